use async_trait::async_trait;
use market_core::{CollectorResult, PricePoint, TableName, UnixSeconds, Watermark};
use std::collections::HashMap;

/// Append-only watermark log.
///
/// Several rows may exist per table between compactions; readers always
/// take the greatest `last_unix_time` per table ("latest wins").
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark per table. Fails with `StoreRead`.
    async fn load_all(&self) -> CollectorResult<HashMap<TableName, UnixSeconds>>;

    /// Insert a new row; never updates an existing one. Fails with `StoreWrite`.
    async fn append(&self, table_name: &str, unix_time: UnixSeconds) -> CollectorResult<()>;

    /// Replace the whole log with one max row per table in a single atomic
    /// overwrite. Fails with `StoreCompaction`.
    async fn compact(&self) -> CollectorResult<()>;
}

/// Streaming-insert sink with one table per series. Appends are not
/// idempotent: appending the same batch twice stores it twice.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Returns the number of rows inserted. Fails with `Write`.
    async fn append_rows(&self, table_name: &str, points: &[PricePoint]) -> CollectorResult<usize>;
}

/// Reduce watermark rows to the latest value per table
pub fn latest_per_table<'a, I>(rows: I) -> HashMap<TableName, UnixSeconds>
where
    I: IntoIterator<Item = &'a Watermark>,
{
    let mut latest: HashMap<TableName, UnixSeconds> = HashMap::new();
    for row in rows {
        latest
            .entry(row.table_name.clone())
            .and_modify(|current| {
                if row.last_unix_time > *current {
                    *current = row.last_unix_time;
                }
            })
            .or_insert(row.last_unix_time);
    }
    latest
}
