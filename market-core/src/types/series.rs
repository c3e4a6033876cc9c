use serde::{Deserialize, Serialize};

use super::UnixSeconds;

/// A market listed on the upstream API together with its warehouse table stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Exchange slug in the upstream URL (e.g. "binance")
    pub exchange_id: String,
    /// Market slug in the upstream URL (e.g. "btcusdt")
    pub ticker: String,
    /// Table stem, combined with a granularity label to name the warehouse table
    pub table_stem: String,
}

impl Exchange {
    pub fn new(exchange_id: &str, ticker: &str, table_stem: &str) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            ticker: ticker.to_string(),
            table_stem: table_stem.to_string(),
        }
    }
}

/// OHLC bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity {
    pub seconds: u64,
    pub label: &'static str,
}

impl Granularity {
    pub const fn new(seconds: u64, label: &'static str) -> Self {
        Self { seconds, label }
    }
}

/// One exchange x granularity combination mapped to one warehouse table.
///
/// `table_name` is the join key between the watermark store, the warehouse
/// and the archive layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub exchange_id: String,
    pub ticker: String,
    pub granularity_seconds: u64,
    pub granularity_label: String,
    pub table_name: String,
}

impl Series {
    pub fn new(exchange: &Exchange, granularity: Granularity) -> Self {
        Self {
            exchange_id: exchange.exchange_id.clone(),
            ticker: exchange.ticker.clone(),
            granularity_seconds: granularity.seconds,
            granularity_label: granularity.label.to_string(),
            table_name: Self::table_name_for(&exchange.table_stem, granularity.label),
        }
    }

    /// `<exchangeTable>_<granularityLabel>`
    pub fn table_name_for(table_stem: &str, granularity_label: &str) -> String {
        format!("{}_{}", table_stem, granularity_label)
    }

    /// Lower bound to send upstream for a stored watermark.
    ///
    /// The upstream `after` parameter is inclusive, so the next fetch starts
    /// one second past the last ingested bucket. `None` means first run.
    pub fn fetch_lower_bound(watermark: Option<UnixSeconds>) -> Option<UnixSeconds> {
        watermark.map(|w| w + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_derivation() {
        let exchange = Exchange::new("binance", "btcusdt", "BINANCE_BTCUSDT");
        let series = Series::new(&exchange, Granularity::new(3600, "1H"));

        assert_eq!(series.table_name, "BINANCE_BTCUSDT_1H");
        assert_eq!(series.granularity_seconds, 3600);
        assert_eq!(series.exchange_id, "binance");
    }

    #[test]
    fn test_fetch_lower_bound() {
        assert_eq!(Series::fetch_lower_bound(Some(1060)), Some(1061));
        assert_eq!(Series::fetch_lower_bound(None), None);
    }
}
