mod config;

use anyhow::Result;
use clap::Parser;
use market_core::{Catalog, CollectorResult};
use market_data_services::{
    deliver_report, ArchiveStore, CryptowatchClient, DualSinkWriter, FailureReport,
    FailureReporter, FsArchiveStore, IngestionOrchestrator, LmdbWarehouse, LogReporter,
    MarketDataSource, RunSummary, SourceContext, Warehouse, WatermarkStore, WebhookReporter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::CollectorConfig;

const FUNCTION_NAME: &str = "market-ingest";

/// Incremental OHLC collector
///
/// Fetches closed candles past each series' watermark, archives them as CSV,
/// appends them to the LMDB warehouse and advances the watermark.
#[derive(Parser, Debug)]
#[command(name = "market-ingest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project id attached to failure reports
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<String>,

    /// Upstream markets API base URL
    #[arg(long, env = "MARKET_API_BASE_URL", default_value = "https://api.cryptowat.ch/markets")]
    api_base_url: String,

    /// LMDB environment directory
    #[arg(long, env = "MARKET_DATA_DIR", default_value = "./data/warehouse")]
    data_dir: PathBuf,

    /// Archive root directory
    #[arg(long, env = "MARKET_ARCHIVE_DIR", default_value = "./data/archive")]
    archive_dir: PathBuf,

    /// Object prefix inside the archive
    #[arg(long, default_value = "btc")]
    archive_prefix: String,

    /// UTC offset in hours used for the archive run stamp
    #[arg(long, default_value = "9", allow_hyphen_values = true)]
    archive_utc_offset: i32,

    /// Timeout for every external call, in seconds
    #[arg(long, default_value = "30")]
    call_timeout_secs: u64,

    /// Upstream request rate limit
    #[arg(long, default_value = "60")]
    requests_per_minute: u32,

    /// Webhook receiving failure reports (log only when unset)
    #[arg(long, env = "FAILURE_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Exchanges to collect (comma-separated, default all)
    #[arg(long, value_delimiter = ',')]
    exchanges: Vec<String>,

    /// Granularity labels to collect (comma-separated, default all)
    #[arg(long, value_delimiter = ',')]
    granularities: Vec<String>,

    /// LMDB map size in MiB
    #[arg(long, default_value = "1024")]
    map_size_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> CollectorConfig {
        CollectorConfig {
            project_id: self.project_id.unwrap_or_default(),
            api_base_url: self.api_base_url,
            data_dir: self.data_dir,
            archive_dir: self.archive_dir,
            archive_prefix: self.archive_prefix,
            archive_utc_offset_hours: self.archive_utc_offset,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            requests_per_minute: self.requests_per_minute,
            webhook_url: self.webhook_url.filter(|url| !url.trim().is_empty()),
            exchanges: self.exchanges,
            granularities: self.granularities,
            map_size_mb: self.map_size_mb,
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "market_ingest={},market_data_services={},market_core={}",
                log_level, log_level, log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_reporter(config: &CollectorConfig) -> Arc<dyn FailureReporter> {
    match &config.webhook_url {
        Some(url) => match WebhookReporter::new(url.clone(), config.call_timeout) {
            Ok(reporter) => Arc::new(reporter),
            Err(e) => {
                tracing::warn!("Webhook reporter unavailable ({}), falling back to logs", e);
                Arc::new(LogReporter)
            }
        },
        None => Arc::new(LogReporter),
    }
}

fn build_orchestrator(config: &CollectorConfig) -> CollectorResult<IngestionOrchestrator> {
    config.validate()?;

    let catalog = Catalog::filtered(&config.exchanges, &config.granularities)?;
    let source: Arc<dyn MarketDataSource> =
        Arc::new(CryptowatchClient::new(config.fetcher_config())?);

    let store = Arc::new(LmdbWarehouse::open(&config.data_dir, config.map_size_mb)?);
    let warehouse: Arc<dyn Warehouse> = store.clone();
    let watermarks: Arc<dyn WatermarkStore> = store;
    let archive: Arc<dyn ArchiveStore> = Arc::new(FsArchiveStore::new(&config.archive_dir));

    let writer = DualSinkWriter::new(warehouse, archive, config.archive_prefix.clone());

    Ok(IngestionOrchestrator::new(
        catalog,
        source,
        watermarks,
        writer,
        config.orchestrator_config()?,
    ))
}

fn log_summary(summary: &RunSummary) {
    for outcome in &summary.series {
        if outcome.skipped {
            tracing::info!(
                "  {}: skipped ({} rows fetched, watermark {:?})",
                outcome.table_name,
                outcome.fetched_rows,
                outcome.previous_watermark
            );
        } else {
            tracing::info!(
                "  {}: {} points, watermark {:?} -> {:?}",
                outcome.table_name,
                outcome.points_written,
                outcome.previous_watermark,
                outcome.new_watermark
            );
        }
    }
    tracing::info!(
        "Run {}: {} series, {} points written, {} skipped, compacted: {}",
        summary.run_stamp,
        summary.series.len(),
        summary.points_written(),
        summary.skipped(),
        summary.compacted
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = cli.into_config();

    tracing::info!("Market data collector starting");
    tracing::info!("Configuration:");
    tracing::info!("  Project: {}", config.project_id);
    tracing::info!("  API: {}", config.api_base_url);
    tracing::info!("  Data dir: {}", config.data_dir.display());
    tracing::info!(
        "  Archive: {}/{}",
        config.archive_dir.display(),
        config.archive_prefix
    );
    tracing::info!(
        "  Timeout: {}s, rate limit: {}/min",
        config.call_timeout.as_secs(),
        config.requests_per_minute
    );

    let reporter = build_reporter(&config);
    let context = SourceContext::new(config.project_id.clone(), FUNCTION_NAME);

    let orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("Setup failed: {}", e);
            let report = FailureReport::from_error(&context, &e);
            let terminal = deliver_report(reporter.as_ref(), &report, e).await;
            return Err(terminal.into());
        }
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    match orchestrator.run(&cancel).await {
        Ok(summary) => {
            log_summary(&summary);
            Ok(())
        }
        Err(failure) => {
            tracing::error!("Run failed: {}", failure);
            let report = FailureReport::from_run_failure(&context, &failure);
            let message = failure.to_string();
            let terminal = deliver_report(reporter.as_ref(), &report, failure.error).await;
            Err(anyhow::Error::new(terminal).context(message))
        }
    }
}
