use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnixSeconds;

/// Number of fields in an upstream OHLC row:
/// `[unixTime, open, high, low, close, volume, quoteVolume]`
pub const RAW_ROW_WIDTH: usize = 7;

/// One upstream OHLC row, kept as the raw numeric array until validated
pub type RawBucketRow = Vec<f64>;

/// Normalized, immutable OHLC bucket.
///
/// Prices carry 2 decimal digits and volumes 8, matching what the upstream
/// API publishes. They are kept as rendered strings so that sinks storing
/// text never re-round or widen them. Field names serialize in the warehouse
/// column style (`UNIX_TIME`, `CLOSE_PRICE`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PricePoint {
    pub unix_time: UnixSeconds,
    /// `unix_time` as a UTC instant
    pub close_time: DateTime<Utc>,
    pub open_price: String,
    pub high_price: String,
    pub low_price: String,
    pub close_price: String,
    pub volume: String,
    pub quote_volume: String,
}

/// Render a price at the upstream's 2-digit precision
pub fn format_price(value: f64) -> String {
    format!("{:.2}", value)
}

/// Render a volume at the upstream's 8-digit precision
pub fn format_volume(value: f64) -> String {
    format!("{:.8}", value)
}
