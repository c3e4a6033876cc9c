use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Fetch error for {table}: {message}")]
    Fetch { table: String, message: String },

    #[error("Malformed row: expected 7 fields, got length={length}, data={row:?}")]
    MalformedRow { length: usize, row: Vec<f64> },

    #[error("Watermark read error: {0}")]
    StoreRead(String),

    #[error("Watermark write error for {table}: {message}")]
    StoreWrite { table: String, message: String },

    #[error("Watermark compaction error: {0}")]
    StoreCompaction(String),

    #[error("Write error for {table} ({sink}): {message}")]
    Write {
        table: String,
        sink: String,
        message: String,
    },

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Failure report delivery error: {0}")]
    Report(String),
}

impl CollectorError {
    /// Stable short code used in failure reports
    pub fn code(&self) -> &'static str {
        match self {
            CollectorError::Config(_) => "CONFIG",
            CollectorError::Fetch { .. } => "FETCH",
            CollectorError::MalformedRow { .. } => "MALFORMED_ROW",
            CollectorError::StoreRead(_) => "STORE_READ",
            CollectorError::StoreWrite { .. } => "STORE_WRITE",
            CollectorError::StoreCompaction(_) => "STORE_COMPACTION",
            CollectorError::Write { .. } => "WRITE",
            CollectorError::Timeout { .. } => "TIMEOUT",
            CollectorError::Cancelled { .. } => "CANCELLED",
            CollectorError::Report(_) => "REPORT",
        }
    }

    pub fn fetch(table: &str, message: impl Into<String>) -> Self {
        CollectorError::Fetch {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn write(table: &str, sink: &str, message: impl Into<String>) -> Self {
        CollectorError::Write {
            table: table.to_string(),
            sink: sink.to_string(),
            message: message.into(),
        }
    }

    pub fn store_write(table: &str, message: impl Into<String>) -> Self {
        CollectorError::StoreWrite {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// True when the run stopped because it was asked to, not because a
    /// collaborator failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CollectorError::Cancelled { .. })
    }
}

pub type CollectorResult<T> = std::result::Result<T, CollectorError>;
