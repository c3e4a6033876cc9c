use market_core::{CollectorError, CollectorResult, PricePoint, Series};
use std::sync::Arc;

use super::archive::{archive_path, encode_csv, ArchiveStore, CSV_CONTENT_TYPE};
use super::bounded::CallBudget;
use super::store::Warehouse;

/// What a successful dual write produced
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub archive_path: String,
    pub rows_inserted: usize,
}

/// Writes one normalized batch to the archive and the warehouse.
///
/// The archive write goes first and is overwrite-idempotent for a given run
/// stamp. The warehouse append is not idempotent. Either failing fails the
/// series, and the caller must not advance its watermark.
pub struct DualSinkWriter {
    warehouse: Arc<dyn Warehouse>,
    archive: Arc<dyn ArchiveStore>,
    archive_prefix: String,
}

impl DualSinkWriter {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        archive: Arc<dyn ArchiveStore>,
        archive_prefix: impl Into<String>,
    ) -> Self {
        Self {
            warehouse,
            archive,
            archive_prefix: archive_prefix.into(),
        }
    }

    pub async fn write(
        &self,
        series: &Series,
        points: &[PricePoint],
        run_stamp: &str,
        budget: &CallBudget,
    ) -> CollectorResult<WriteReceipt> {
        let table = series.table_name.as_str();
        let path = archive_path(&self.archive_prefix, series, run_stamp);

        let body = encode_csv(points).map_err(|e| CollectorError::write(table, "archive", e))?;
        budget
            .run(
                &format!("archive write {}", path),
                self.archive.put(&path, CSV_CONTENT_TYPE, body),
            )
            .await
            .map_err(|e| match e {
                // Stores only know the object path; report the series' table
                CollectorError::Write { message, .. } => {
                    CollectorError::write(table, "archive", format!("{}: {}", path, message))
                }
                other => other,
            })?;

        let rows_inserted = budget
            .run(
                &format!("warehouse insert {}", table),
                self.warehouse.append_rows(table, points),
            )
            .await?;

        tracing::info!(
            "Wrote {} points for {} (archive: {}, warehouse rows: {})",
            points.len(),
            table,
            path,
            rows_inserted
        );

        Ok(WriteReceipt {
            archive_path: path,
            rows_inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use market_core::{Exchange, Granularity};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct FailingArchive;

    #[async_trait]
    impl ArchiveStore for FailingArchive {
        async fn put(&self, path: &str, _content_type: &str, _body: Vec<u8>) -> CollectorResult<()> {
            Err(CollectorError::write(path, "archive", "bucket unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingArchive {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveStore for RecordingArchive {
        async fn put(&self, path: &str, _content_type: &str, _body: Vec<u8>) -> CollectorResult<()> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWarehouse {
        tables: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        async fn append_rows(&self, table_name: &str, points: &[PricePoint]) -> CollectorResult<usize> {
            self.tables.lock().unwrap().push(table_name.to_string());
            Ok(points.len())
        }
    }

    fn series() -> Series {
        let exchange = Exchange::new("binance", "btcusdt", "BINANCE_BTCUSDT");
        Series::new(&exchange, Granularity::new(60, "1M"))
    }

    fn points() -> Vec<PricePoint> {
        market_core::normalize(&[
            vec![1000.0, 10.0, 12.0, 9.0, 11.0, 5.0, 50.0],
            vec![1060.0, 11.0, 13.0, 10.0, 12.0, 6.0, 60.0],
        ])
        .unwrap()
    }

    fn budget() -> CallBudget {
        CallBudget::new(Duration::from_secs(1), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_write_returns_receipt() {
        let warehouse = Arc::new(RecordingWarehouse::default());
        let archive = Arc::new(RecordingArchive::default());
        let writer = DualSinkWriter::new(warehouse.clone(), archive.clone(), "btc");

        let receipt = writer
            .write(&series(), &points(), "20240131_09h", &budget())
            .await
            .unwrap();

        assert_eq!(receipt.archive_path, "btc/BINANCE_BTCUSDT_1M/1M/20240131_09h.csv");
        assert_eq!(receipt.rows_inserted, 1);
        assert_eq!(*archive.paths.lock().unwrap(), vec![receipt.archive_path.clone()]);
        assert_eq!(*warehouse.tables.lock().unwrap(), vec!["BINANCE_BTCUSDT_1M".to_string()]);
    }

    #[tokio::test]
    async fn test_archive_failure_names_table_and_skips_warehouse() {
        let warehouse = Arc::new(RecordingWarehouse::default());
        let writer = DualSinkWriter::new(warehouse.clone(), Arc::new(FailingArchive), "btc");

        let err = writer
            .write(&series(), &points(), "20240131_09h", &budget())
            .await
            .unwrap_err();

        match err {
            CollectorError::Write { table, sink, message } => {
                assert_eq!(table, "BINANCE_BTCUSDT_1M");
                assert_eq!(sink, "archive");
                assert!(message.contains("btc/BINANCE_BTCUSDT_1M/1M/20240131_09h.csv"));
                assert!(message.contains("bucket unavailable"));
            }
            other => panic!("expected Write, got {:?}", other),
        }
        assert!(warehouse.tables.lock().unwrap().is_empty());
    }
}
