pub mod archive;
pub mod bounded;
pub mod fetcher;
pub mod lmdb_store;
pub mod orchestrator;
pub mod reporter;
pub mod sink_writer;
pub mod store;

#[cfg(test)]
mod test_http;

// Re-export commonly used items
pub use archive::{ArchiveStore, FsArchiveStore};
pub use bounded::CallBudget;
pub use fetcher::{CryptowatchClient, FetcherConfig, MarketDataSource, RawSeriesBundle};
pub use lmdb_store::LmdbWarehouse;
pub use orchestrator::{
    IngestionOrchestrator, OrchestratorConfig, RunFailure, RunSummary, SeriesOutcome, Stage,
};
pub use reporter::{
    deliver_report, FailureReport, FailureReporter, LogReporter, SourceContext, WebhookReporter,
};
pub use sink_writer::{DualSinkWriter, WriteReceipt};
pub use store::{Warehouse, WatermarkStore};
