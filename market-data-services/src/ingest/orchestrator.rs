use chrono::{FixedOffset, Offset, Utc};
use market_core::normalizer::{batch_high_watermark, is_time_ordered};
use market_core::{
    normalize, Catalog, CollectorError, RunContext, Series, TableName, UnixSeconds,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::bounded::CallBudget;
use super::fetcher::MarketDataSource;
use super::sink_writer::DualSinkWriter;
use super::store::WatermarkStore;

/// Step of a run, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadWatermarks,
    Fetch,
    Normalize,
    Write,
    AdvanceWatermark,
    CompactWatermarks,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LoadWatermarks => "LoadWatermarks",
            Stage::Fetch => "Fetch",
            Stage::Normalize => "Normalize",
            Stage::Write => "Write",
            Stage::AdvanceWatermark => "AdvanceWatermark",
            Stage::CompactWatermarks => "CompactWatermarks",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a run, with the series and stage it came from
#[derive(Error, Debug)]
#[error("{stage} failed for {}: {error}", .table_name.as_deref().unwrap_or("run"))]
pub struct RunFailure {
    pub table_name: Option<TableName>,
    pub stage: Stage,
    #[source]
    pub error: CollectorError,
}

impl RunFailure {
    fn run_level(stage: Stage, error: CollectorError) -> Self {
        Self {
            table_name: None,
            stage,
            error,
        }
    }

    fn series(series: &Series, stage: Stage, error: CollectorError) -> Self {
        Self {
            table_name: Some(series.table_name.clone()),
            stage,
            error,
        }
    }
}

/// Result of processing one series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesOutcome {
    pub table_name: TableName,
    pub fetched_rows: usize,
    pub points_written: usize,
    pub previous_watermark: Option<UnixSeconds>,
    pub new_watermark: Option<UnixSeconds>,
    /// No closed bucket past the watermark yet
    pub skipped: bool,
    pub duration_ms: u64,
}

/// Statistics from a completed run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_stamp: String,
    pub series: Vec<SeriesOutcome>,
    pub compacted: bool,
}

impl RunSummary {
    pub fn points_written(&self) -> usize {
        self.series.iter().map(|s| s.points_written).sum()
    }

    pub fn skipped(&self) -> usize {
        self.series.iter().filter(|s| s.skipped).count()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Offset the archive run stamp is rendered in
    pub archive_offset: FixedOffset,
    /// Upper bound for every external call
    pub call_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            archive_offset: FixedOffset::east_opt(9 * 3600).unwrap_or(Utc.fix()),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Incremental ingestion run:
/// 1. Loads the watermark snapshot once
/// 2. For each series in catalog order: fetch past the watermark, drop the
///    open bucket, write both sinks, append the new watermark
/// 3. Compacts the watermark log once every series succeeded
///
/// Any failure stops the run; series already written stay written.
pub struct IngestionOrchestrator {
    catalog: Catalog,
    /// Response key (granularity seconds) -> label, built once from the catalog
    granularity_keys: BTreeMap<u64, String>,
    source: Arc<dyn MarketDataSource>,
    watermarks: Arc<dyn WatermarkStore>,
    writer: DualSinkWriter,
    config: OrchestratorConfig,
}

impl IngestionOrchestrator {
    pub fn new(
        catalog: Catalog,
        source: Arc<dyn MarketDataSource>,
        watermarks: Arc<dyn WatermarkStore>,
        writer: DualSinkWriter,
        config: OrchestratorConfig,
    ) -> Self {
        let granularity_keys = catalog.granularity_keys();
        Self {
            catalog,
            granularity_keys,
            source,
            watermarks,
            writer,
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run once, stamping archives with the current time
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, RunFailure> {
        self.run_with_context(RunContext::now(), cancel).await
    }

    pub async fn run_with_context(
        &self,
        ctx: RunContext,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunFailure> {
        let budget = CallBudget::new(self.config.call_timeout, cancel.clone());
        let run_stamp = ctx.stamp(self.config.archive_offset);

        tracing::info!(
            "Starting ingestion run {} over {} series",
            run_stamp,
            self.catalog.len()
        );

        let snapshot = self.load_watermarks(&budget).await?;

        let mut summary = RunSummary {
            run_stamp: run_stamp.clone(),
            ..RunSummary::default()
        };

        for series in self.catalog.iter() {
            if budget.is_cancelled() {
                return Err(RunFailure::series(
                    series,
                    Stage::Fetch,
                    CollectorError::Cancelled {
                        operation: format!("run {}", run_stamp),
                    },
                ));
            }

            let watermark = snapshot.get(&series.table_name).copied();
            let outcome = self
                .ingest_series(series, watermark, &run_stamp, &budget)
                .await?;
            summary.series.push(outcome);
        }

        budget
            .run("compact watermarks", self.watermarks.compact())
            .await
            .map_err(|e| RunFailure::run_level(Stage::CompactWatermarks, e))?;
        summary.compacted = true;

        tracing::info!(
            "Ingestion run {} complete: {} series, {} points written, {} skipped",
            run_stamp,
            summary.series.len(),
            summary.points_written(),
            summary.skipped()
        );

        Ok(summary)
    }

    /// Watermark snapshot used for the whole run
    pub async fn load_watermarks(
        &self,
        budget: &CallBudget,
    ) -> Result<HashMap<TableName, UnixSeconds>, RunFailure> {
        let snapshot = budget
            .run("load watermarks", self.watermarks.load_all())
            .await
            .map_err(|e| RunFailure::run_level(Stage::LoadWatermarks, e))?;

        tracing::info!("Loaded watermarks for {} tables", snapshot.len());
        Ok(snapshot)
    }

    /// Key of the response array holding `series`' rows.
    ///
    /// Fails for a series whose granularity the catalog does not carry, so
    /// rows are never picked from an array meant for another bucket width.
    fn response_key(&self, series: &Series) -> Result<u64, RunFailure> {
        self.granularity_keys
            .get_key_value(&series.granularity_seconds)
            .filter(|(_, label)| **label == series.granularity_label)
            .map(|(seconds, _)| *seconds)
            .ok_or_else(|| {
                RunFailure::series(
                    series,
                    Stage::Fetch,
                    CollectorError::Config(format!(
                        "granularity {} ({}s) is not in the catalog",
                        series.granularity_label, series.granularity_seconds
                    )),
                )
            })
    }

    /// Fetch -> normalize -> write -> advance for a single series.
    ///
    /// `watermark` must come from the run's snapshot, never a fresh read.
    /// Series are independent of each other, so this may be driven
    /// concurrently across series as long as each series' own steps stay in
    /// order.
    pub async fn ingest_series(
        &self,
        series: &Series,
        watermark: Option<UnixSeconds>,
        run_stamp: &str,
        budget: &CallBudget,
    ) -> Result<SeriesOutcome, RunFailure> {
        let started = Instant::now();
        let table = series.table_name.as_str();
        let after = Series::fetch_lower_bound(watermark);
        let key = self.response_key(series)?;

        tracing::debug!("Processing {} (watermark: {:?}, after: {:?})", table, watermark, after);

        let bundle = budget
            .run(&format!("fetch {}", table), self.source.fetch(series, after))
            .await
            .map_err(|e| RunFailure::series(series, Stage::Fetch, e))?;

        let rows = bundle.rows_for(key);
        let points = normalize(rows).map_err(|e| RunFailure::series(series, Stage::Normalize, e))?;

        let mut outcome = SeriesOutcome {
            table_name: series.table_name.clone(),
            fetched_rows: rows.len(),
            previous_watermark: watermark,
            ..SeriesOutcome::default()
        };

        if points.is_empty() {
            tracing::info!("No closed buckets for {} yet ({} rows fetched)", table, rows.len());
            outcome.skipped = true;
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(outcome);
        }

        if !is_time_ordered(&points) {
            tracing::warn!("Upstream rows for {} are not strictly ascending", table);
        }

        self.writer
            .write(series, &points, run_stamp, budget)
            .await
            .map_err(|e| RunFailure::series(series, Stage::Write, e))?;
        outcome.points_written = points.len();

        match (batch_high_watermark(&points), watermark) {
            (Some(high), Some(previous)) if high <= previous => {
                tracing::warn!(
                    "Batch for {} ends at {} which is not past watermark {}; not advancing",
                    table,
                    high,
                    previous
                );
            }
            (Some(high), _) => {
                budget
                    .run(
                        &format!("advance watermark {}", table),
                        self.watermarks.append(table, high),
                    )
                    .await
                    .map_err(|e| RunFailure::series(series, Stage::AdvanceWatermark, e))?;
                outcome.new_watermark = Some(high);
            }
            (None, _) => {}
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Ingested {}: {} points, watermark {:?} -> {:?} ({}ms)",
            table,
            outcome.points_written,
            watermark,
            outcome.new_watermark,
            outcome.duration_ms
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_failure_message_names_table_and_stage() {
        let failure = RunFailure {
            table_name: Some("BINANCE_BTCUSDT_1M".to_string()),
            stage: Stage::Write,
            error: CollectorError::write("BINANCE_BTCUSDT_1M", "warehouse", "quota"),
        };

        let msg = failure.to_string();
        assert!(msg.starts_with("Write failed for BINANCE_BTCUSDT_1M"));
        assert!(msg.contains("quota"));
    }

    #[test]
    fn test_run_level_failure_message() {
        let failure = RunFailure::run_level(
            Stage::LoadWatermarks,
            CollectorError::StoreRead("offline".into()),
        );
        assert_eq!(
            failure.to_string(),
            "LoadWatermarks failed for run: Watermark read error: offline"
        );
    }

    #[test]
    fn test_summary_totals() {
        let summary = RunSummary {
            run_stamp: "20240101_00h".into(),
            series: vec![
                SeriesOutcome {
                    points_written: 3,
                    ..SeriesOutcome::default()
                },
                SeriesOutcome {
                    skipped: true,
                    ..SeriesOutcome::default()
                },
            ],
            compacted: true,
        };

        assert_eq!(summary.points_written(), 3);
        assert_eq!(summary.skipped(), 1);
    }
}
