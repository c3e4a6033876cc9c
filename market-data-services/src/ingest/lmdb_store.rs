use async_trait::async_trait;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use market_core::{CollectorError, CollectorResult, PricePoint, TableName, UnixSeconds, Watermark};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::store::{latest_per_table, Warehouse, WatermarkStore};

/// LMDB-backed warehouse and watermark log
///
/// Database structure:
/// - price_rows: normalized OHLC rows, one logical table per series
/// - watermarks: append-only watermark log
///
/// Key format:
/// - price_rows: {table_name}/{seq}
/// - watermarks: {seq}
///
/// `seq` is a zero-padded, process-monotonic insert id seeded from the wall
/// clock. Inserts never overwrite, so appending the same batch twice stores
/// it twice, as a streaming-insert warehouse would.
/// Value format: JSON serialized `PricePoint` / `Watermark`
#[derive(Clone)]
pub struct LmdbWarehouse {
    env: Arc<Environment>,
    db_rows: Database,
    db_watermarks: Database,
    next_seq: Arc<AtomicU64>,
}

impl LmdbWarehouse {
    /// Open (or create) the LMDB environment at `db_path`
    ///
    /// # Arguments
    /// * `db_path` - Directory holding the LMDB files; created if missing
    /// * `map_size_mb` - Maximum size of the memory map in MiB
    pub fn open<P: AsRef<Path>>(db_path: P, map_size_mb: usize) -> CollectorResult<Self> {
        let db_path = db_path.as_ref();
        let map_size = map_size_bytes(map_size_mb)?;

        std::fs::create_dir_all(db_path).map_err(|e| {
            CollectorError::StoreRead(format!(
                "failed to create LMDB dir {}: {}",
                db_path.display(),
                e
            ))
        })?;

        tracing::info!("Opening LMDB warehouse at: {}", db_path.display());

        let env = Environment::new()
            .set_max_dbs(4)
            .set_map_size(map_size)
            .open(db_path)
            .map_err(|e| CollectorError::StoreRead(format!("failed to open LMDB environment: {}", e)))?;

        let db_rows = env
            .create_db(Some("price_rows"), DatabaseFlags::empty())
            .map_err(|e| CollectorError::StoreRead(format!("failed to open price_rows database: {}", e)))?;

        let db_watermarks = env
            .create_db(Some("watermarks"), DatabaseFlags::empty())
            .map_err(|e| CollectorError::StoreRead(format!("failed to open watermarks database: {}", e)))?;

        let seed = chrono::Utc::now().timestamp_micros().max(0) as u64 * 1000;

        Ok(Self {
            env: Arc::new(env),
            db_rows,
            db_watermarks,
            next_seq: Arc::new(AtomicU64::new(seed)),
        })
    }

    fn row_prefix(table_name: &str) -> String {
        format!("{}/", table_name)
    }

    fn row_key(table_name: &str, seq: u64) -> String {
        format!("{}/{:020}", table_name, seq)
    }

    fn seq_key(seq: u64) -> String {
        format!("{:020}", seq)
    }

    /// Every stored row of a table, in insert order
    pub async fn rows(&self, table_name: &str) -> CollectorResult<Vec<PricePoint>> {
        let env = Arc::clone(&self.env);
        let db = self.db_rows;
        let prefix = Self::row_prefix(table_name);

        run_blocking(move || {
            let txn = env.begin_ro_txn().map_err(|e| e.to_string())?;
            let mut points = Vec::new();
            {
                let mut cursor = txn.open_ro_cursor(db).map_err(|e| e.to_string())?;
                for (key, value) in cursor.iter_from(prefix.as_bytes()) {
                    if !key.starts_with(prefix.as_bytes()) {
                        break;
                    }
                    let point: PricePoint = serde_json::from_slice(value)
                        .map_err(|e| format!("corrupt row {}: {}", String::from_utf8_lossy(key), e))?;
                    points.push(point);
                }
            }
            txn.abort();
            Ok(points)
        })
        .await
        .map_err(CollectorError::StoreRead)
    }

    /// Raw watermark log, including superseded rows
    pub async fn watermark_rows(&self) -> CollectorResult<Vec<Watermark>> {
        let env = Arc::clone(&self.env);
        let db = self.db_watermarks;

        run_blocking(move || {
            let txn = env.begin_ro_txn().map_err(|e| e.to_string())?;
            let rows = read_watermarks(&txn, db)?;
            txn.abort();
            Ok(rows)
        })
        .await
        .map_err(CollectorError::StoreRead)
    }
}

/// LMDB map size in bytes for a size given in MiB
pub fn map_size_bytes(map_size_mb: usize) -> CollectorResult<usize> {
    map_size_mb
        .checked_mul(1024 * 1024)
        .filter(|bytes| *bytes > 0)
        .ok_or_else(|| {
            CollectorError::Config(format!("invalid LMDB map size: {} MiB", map_size_mb))
        })
}

/// Decode every row of the watermark database
fn read_watermarks<T: Transaction>(txn: &T, db: Database) -> Result<Vec<Watermark>, String> {
    let mut cursor = txn.open_ro_cursor(db).map_err(|e| e.to_string())?;
    let mut rows = Vec::new();
    for (key, value) in cursor.iter_start() {
        let row: Watermark = serde_json::from_slice(value).map_err(|e| {
            format!("corrupt watermark {}: {}", String::from_utf8_lossy(key), e)
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Insert `value` under the next free key produced by `make_key`
fn put_unique(
    txn: &mut lmdb::RwTransaction<'_>,
    db: Database,
    next_seq: &AtomicU64,
    make_key: impl Fn(u64) -> String,
    value: &[u8],
) -> Result<(), String> {
    loop {
        let key = make_key(next_seq.fetch_add(1, Ordering::SeqCst));
        match txn.put(db, &key, &value, WriteFlags::NO_OVERWRITE) {
            Ok(()) => return Ok(()),
            Err(lmdb::Error::KeyExist) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("LMDB task failed: {}", e))?
}

#[async_trait]
impl Warehouse for LmdbWarehouse {
    async fn append_rows(&self, table_name: &str, points: &[PricePoint]) -> CollectorResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let env = Arc::clone(&self.env);
        let db = self.db_rows;
        let next_seq = Arc::clone(&self.next_seq);
        let table = table_name.to_string();
        let values = points
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CollectorError::write(table_name, "warehouse", e.to_string()))?;

        tracing::debug!("Appending {} rows to {}", values.len(), table_name);

        run_blocking(move || {
            let mut txn = env.begin_rw_txn().map_err(|e| e.to_string())?;
            for value in &values {
                put_unique(&mut txn, db, &next_seq, |seq| Self::row_key(&table, seq), value)?;
            }
            txn.commit().map_err(|e| e.to_string())?;
            Ok(values.len())
        })
        .await
        .map_err(|e| CollectorError::write(table_name, "warehouse", e))
    }
}

#[async_trait]
impl WatermarkStore for LmdbWarehouse {
    async fn load_all(&self) -> CollectorResult<HashMap<TableName, UnixSeconds>> {
        let rows = self.watermark_rows().await?;
        tracing::debug!("Loaded {} watermark rows", rows.len());
        Ok(latest_per_table(&rows))
    }

    async fn append(&self, table_name: &str, unix_time: UnixSeconds) -> CollectorResult<()> {
        let env = Arc::clone(&self.env);
        let db = self.db_watermarks;
        let next_seq = Arc::clone(&self.next_seq);
        let value = serde_json::to_vec(&Watermark::new(table_name, unix_time))
            .map_err(|e| CollectorError::store_write(table_name, e.to_string()))?;

        run_blocking(move || {
            let mut txn = env.begin_rw_txn().map_err(|e| e.to_string())?;
            put_unique(&mut txn, db, &next_seq, Self::seq_key, &value)?;
            txn.commit().map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| CollectorError::store_write(table_name, e))
    }

    async fn compact(&self) -> CollectorResult<()> {
        let env = Arc::clone(&self.env);
        let db = self.db_watermarks;
        let next_seq = Arc::clone(&self.next_seq);

        let (before, after) = run_blocking(move || {
            // One write transaction: concurrent readers see the old log or
            // the compacted one, never a partial state.
            let mut txn = env.begin_rw_txn().map_err(|e| e.to_string())?;
            let rows = read_watermarks(&txn, db)?;

            let mut latest: Vec<Watermark> = latest_per_table(&rows)
                .into_iter()
                .map(|(table_name, last_unix_time)| Watermark::new(table_name, last_unix_time))
                .collect();
            latest.sort_by(|a, b| a.table_name.cmp(&b.table_name));

            txn.clear_db(db).map_err(|e| e.to_string())?;
            for row in &latest {
                let value = serde_json::to_vec(row).map_err(|e| e.to_string())?;
                put_unique(&mut txn, db, &next_seq, Self::seq_key, &value)?;
            }
            txn.commit().map_err(|e| e.to_string())?;
            Ok((rows.len(), latest.len()))
        })
        .await
        .map_err(CollectorError::StoreCompaction)?;

        tracing::info!("Compacted watermark log: {} rows -> {} rows", before, after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_key() {
        let key = LmdbWarehouse::row_key("BINANCE_BTCUSDT_1M", 42);
        assert_eq!(key, "BINANCE_BTCUSDT_1M/00000000000000000042");
    }

    #[test]
    fn test_row_keys_sort_in_insert_order() {
        let a = LmdbWarehouse::row_key("T_1M", 9);
        let b = LmdbWarehouse::row_key("T_1M", 10);
        assert!(a < b);
    }

    #[test]
    fn test_prefix_does_not_match_longer_table_names() {
        let prefix = LmdbWarehouse::row_prefix("T_1M");
        assert!(!LmdbWarehouse::row_key("T_1MX", 1).starts_with(&prefix));
        assert!(LmdbWarehouse::row_key("T_1M", 1).starts_with(&prefix));
    }

    #[test]
    fn test_map_size_bytes() {
        assert_eq!(map_size_bytes(16).unwrap(), 16 * 1024 * 1024);
        assert!(matches!(map_size_bytes(0), Err(CollectorError::Config(_))));
        assert!(matches!(map_size_bytes(usize::MAX), Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_open_rejects_oversized_map_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warehouse");

        let err = LmdbWarehouse::open(&path, usize::MAX).err().unwrap();
        assert_eq!(err.code(), "CONFIG");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_append_and_load_single_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbWarehouse::open(dir.path(), 16).unwrap();

        store.append("T_1M", 1000).await.unwrap();
        store.append("T_1M", 1060).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.get("T_1M"), Some(&1060));
        assert_eq!(store.watermark_rows().await.unwrap().len(), 2);
    }
}
