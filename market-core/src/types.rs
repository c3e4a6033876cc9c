pub mod price_point;
pub mod series;
pub mod watermark;

// Re-export common types
pub use price_point::{PricePoint, RawBucketRow, RAW_ROW_WIDTH};
pub use series::{Exchange, Granularity, Series};
pub use watermark::{RunContext, Watermark};

/// Timestamp in whole seconds since Unix epoch, as used by the upstream OHLC API
pub type UnixSeconds = i64;

/// Warehouse table identifier, e.g. "BINANCE_BTCUSDT_1H"
pub type TableName = String;
