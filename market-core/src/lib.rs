pub mod catalog;
pub mod error;
pub mod normalizer;
pub mod types;

// Re-export commonly used items
pub use catalog::{Catalog, GRANULARITIES};
pub use error::{CollectorError, CollectorResult};
pub use normalizer::normalize;
pub use types::{
    Exchange, Granularity, PricePoint, RawBucketRow, RunContext, Series, TableName, UnixSeconds,
    Watermark,
};
