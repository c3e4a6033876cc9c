use chrono::FixedOffset;
use market_core::{CollectorError, CollectorResult};
use market_data_services::ingest::lmdb_store::map_size_bytes;
use market_data_services::{FetcherConfig, OrchestratorConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Collector configuration, resolved from the command line and environment
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub project_id: String,
    pub api_base_url: String,
    pub data_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_prefix: String,
    pub archive_utc_offset_hours: i32,
    pub call_timeout: Duration,
    pub requests_per_minute: u32,
    pub webhook_url: Option<String>,
    pub exchanges: Vec<String>,
    pub granularities: Vec<String>,
    pub map_size_mb: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_base_url: "https://api.cryptowat.ch/markets".to_string(),
            data_dir: PathBuf::from("./data/warehouse"),
            archive_dir: PathBuf::from("./data/archive"),
            archive_prefix: "btc".to_string(),
            archive_utc_offset_hours: 9,
            call_timeout: Duration::from_secs(30),
            requests_per_minute: 60,
            webhook_url: None,
            exchanges: Vec::new(),
            granularities: Vec::new(),
            map_size_mb: 1024,
        }
    }
}

impl CollectorConfig {
    /// Reject settings that would fail the run later in a less obvious way
    pub fn validate(&self) -> CollectorResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(CollectorError::Config("project id is required".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(CollectorError::Config(
                "call timeout must be greater than zero".into(),
            ));
        }
        if self.requests_per_minute == 0 {
            return Err(CollectorError::Config(
                "requests per minute must be greater than zero".into(),
            ));
        }
        map_size_bytes(self.map_size_mb)?;
        self.archive_offset()?;
        Ok(())
    }

    pub fn archive_offset(&self) -> CollectorResult<FixedOffset> {
        if !(-23..=23).contains(&self.archive_utc_offset_hours) {
            return Err(CollectorError::Config(format!(
                "archive UTC offset {}h is outside -23..=23",
                self.archive_utc_offset_hours
            )));
        }
        FixedOffset::east_opt(self.archive_utc_offset_hours * 3600).ok_or_else(|| {
            CollectorError::Config(format!(
                "invalid archive UTC offset {}h",
                self.archive_utc_offset_hours
            ))
        })
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            base_url: self.api_base_url.clone(),
            timeout: self.call_timeout,
            requests_per_minute: self.requests_per_minute,
        }
    }

    pub fn orchestrator_config(&self) -> CollectorResult<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            archive_offset: self.archive_offset()?,
            call_timeout: self.call_timeout,
        })
    }
}
