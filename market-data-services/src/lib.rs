pub mod ingest;

// Re-export commonly used items
pub use ingest::{
    deliver_report, ArchiveStore, CallBudget, CryptowatchClient, DualSinkWriter, FailureReport,
    FailureReporter, FetcherConfig, FsArchiveStore, IngestionOrchestrator, LmdbWarehouse,
    LogReporter, MarketDataSource, OrchestratorConfig, RawSeriesBundle, RunFailure, RunSummary,
    SeriesOutcome, SourceContext, Stage, Warehouse, WatermarkStore, WebhookReporter,
    WriteReceipt,
};
