use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use super::{TableName, UnixSeconds};

/// Last successfully ingested bucket for one warehouse table.
///
/// The store is append-only, so several rows may exist per table; the
/// current one is the row with the greatest `last_unix_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub table_name: TableName,
    pub last_unix_time: UnixSeconds,
}

impl Watermark {
    pub fn new(table_name: impl Into<TableName>, last_unix_time: UnixSeconds) -> Self {
        Self {
            table_name: table_name.into(),
            last_unix_time,
        }
    }
}

/// Per-run state captured once when the orchestrator starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub executed_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(executed_at: DateTime<Utc>) -> Self {
        Self { executed_at }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Archive stamp for this run, e.g. `20240131_09h`, rendered in the
    /// given offset. Every series of a run shares the same stamp.
    pub fn stamp(&self, offset: FixedOffset) -> String {
        self.executed_at
            .with_timezone(&offset)
            .format("%Y%m%d_%Hh")
            .to_string()
    }
}
