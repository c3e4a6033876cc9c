//! Series catalog
//!
//! The immutable list of exchange x granularity series collected on every
//! run. Built once at startup and handed to the orchestrator; iteration
//! order is exchange-major, granularity-minor and never changes within a
//! process.

use std::collections::BTreeMap;

use crate::error::{CollectorError, CollectorResult};
use crate::types::{Exchange, Granularity, Series};

/// Bucket widths published by the upstream OHLC endpoint
pub const GRANULARITIES: [Granularity; 13] = [
    Granularity::new(60, "1M"),
    Granularity::new(180, "3M"),
    Granularity::new(300, "5M"),
    Granularity::new(900, "15M"),
    Granularity::new(1800, "30M"),
    Granularity::new(3600, "1H"),
    Granularity::new(7200, "2H"),
    Granularity::new(14400, "4H"),
    Granularity::new(21600, "6H"),
    Granularity::new(43200, "12H"),
    Granularity::new(86400, "1D"),
    Granularity::new(259200, "3D"),
    Granularity::new(604800, "1W"),
];

/// Markets collected by default
pub fn default_exchanges() -> Vec<Exchange> {
    vec![
        Exchange::new("bitflyer", "btcfxjpy", "BITFLYER_BTCFXJPY"),
        Exchange::new(
            "bitmex",
            "btcusd-perpetual-future-inverse",
            "BITMEX_BTCUSD-PERPETUAL-FUTURE-INVERSE",
        ),
        Exchange::new("bitfinex", "btcusd", "BITFINEX_BTCUSD"),
        Exchange::new("binance", "btcusdt", "BINANCE_BTCUSDT"),
    ]
}

#[derive(Debug, Clone)]
pub struct Catalog {
    series: Vec<Series>,
}

impl Catalog {
    /// Cross product of `exchanges` and `granularities`, in that order
    pub fn new(exchanges: &[Exchange], granularities: &[Granularity]) -> Self {
        let series = exchanges
            .iter()
            .flat_map(|exchange| {
                granularities
                    .iter()
                    .map(move |granularity| Series::new(exchange, *granularity))
            })
            .collect();

        Self { series }
    }

    /// Default catalog narrowed to the named exchanges and granularity labels.
    ///
    /// Empty filters keep everything. Names are matched case-insensitively;
    /// an unknown name is a configuration error.
    pub fn filtered(exchange_ids: &[String], granularity_labels: &[String]) -> CollectorResult<Self> {
        let all_exchanges = default_exchanges();

        let exchanges = if exchange_ids.is_empty() {
            all_exchanges
        } else {
            for id in exchange_ids {
                if !all_exchanges
                    .iter()
                    .any(|e| e.exchange_id.eq_ignore_ascii_case(id))
                {
                    return Err(CollectorError::Config(format!("unknown exchange: {}", id)));
                }
            }
            all_exchanges
                .into_iter()
                .filter(|e| {
                    exchange_ids
                        .iter()
                        .any(|id| e.exchange_id.eq_ignore_ascii_case(id))
                })
                .collect()
        };

        let granularities: Vec<Granularity> = if granularity_labels.is_empty() {
            GRANULARITIES.to_vec()
        } else {
            for label in granularity_labels {
                if !GRANULARITIES
                    .iter()
                    .any(|g| g.label.eq_ignore_ascii_case(label))
                {
                    return Err(CollectorError::Config(format!(
                        "unknown granularity: {}",
                        label
                    )));
                }
            }
            GRANULARITIES
                .iter()
                .copied()
                .filter(|g| {
                    granularity_labels
                        .iter()
                        .any(|label| g.label.eq_ignore_ascii_case(label))
                })
                .collect()
        };

        Ok(Self::new(&exchanges, &granularities))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Granularity seconds -> label for every granularity in the catalog.
    ///
    /// The upstream response carries one row array per granularity under a
    /// key equal to its width in seconds; this is the lookup used to pick
    /// the array a series consumes.
    pub fn granularity_keys(&self) -> BTreeMap<u64, String> {
        self.series
            .iter()
            .map(|s| (s.granularity_seconds, s.granularity_label.clone()))
            .collect()
    }

    pub fn find(&self, table_name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.table_name == table_name)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(&default_exchanges(), &GRANULARITIES)
    }
}
