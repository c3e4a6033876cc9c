use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use market_core::{CollectorError, CollectorResult, RawBucketRow, Series, UnixSeconds};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Request budget reported by the upstream API with every response
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Allowance {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub remaining: f64,
}

/// Decoded OHLC response: one row array per granularity, keyed by the
/// granularity width in seconds.
#[derive(Debug, Clone, Default)]
pub struct RawSeriesBundle {
    pub allowance: Option<Allowance>,
    pub buckets: HashMap<u64, Vec<RawBucketRow>>,
}

impl RawSeriesBundle {
    /// Rows for one granularity, oldest first. Missing key means no rows.
    pub fn rows_for(&self, granularity_seconds: u64) -> &[RawBucketRow] {
        self.buckets
            .get(&granularity_seconds)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Source of raw OHLC rows for a series.
///
/// `after` is sent upstream verbatim as the inclusive lower bound; the
/// orchestrator passes `watermark + 1`, or `None` on a series' first run.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(
        &self,
        series: &Series,
        after: Option<UnixSeconds>,
    ) -> CollectorResult<RawSeriesBundle>;
}

#[derive(Debug, Deserialize)]
struct OhlcResponse {
    #[serde(default)]
    allowance: Option<Allowance>,
    /// `null` appears both for the whole map and for single granularities
    #[serde(default)]
    result: Option<HashMap<u64, Option<Vec<RawBucketRow>>>>,
    #[serde(default)]
    error: Option<String>,
}

/// Configuration for the upstream OHLC client
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cryptowat.ch/markets".to_string(),
            timeout: Duration::from_secs(30),
            requests_per_minute: 60,
        }
    }
}

/// HTTP client for the `/<exchange>/<ticker>/ohlc` endpoint with client-side
/// rate limiting
pub struct CryptowatchClient {
    http: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl CryptowatchClient {
    pub fn new(config: FetcherConfig) -> CollectorResult<Self> {
        tracing::info!(
            "Initializing OHLC client: base_url={}, timeout={:?}, rate_limit={}/min",
            config.base_url,
            config.timeout,
            config.requests_per_minute
        );

        let requests_per_minute = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| CollectorError::Config("requests_per_minute must be > 0".into()))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CollectorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute))),
        })
    }
}

/// `<base>/<exchange>/<ticker>/ohlc?periods=<secs>[&after=<after>]`
pub fn ohlc_url(base_url: &str, series: &Series, after: Option<UnixSeconds>) -> String {
    let mut url = format!(
        "{}/{}/{}/ohlc?periods={}",
        base_url.trim_end_matches('/'),
        series.exchange_id,
        series.ticker,
        series.granularity_seconds
    );
    if let Some(after) = after {
        url.push_str(&format!("&after={}", after));
    }
    url
}

/// Decode a response body. A non-empty `error` field is a failure even when
/// the HTTP status was 200.
pub fn decode_response(table_name: &str, body: &str) -> CollectorResult<RawSeriesBundle> {
    let response: OhlcResponse = serde_json::from_str(body)
        .map_err(|e| CollectorError::fetch(table_name, format!("malformed payload: {}", e)))?;

    if let Some(error) = response.error.filter(|e| !e.is_empty()) {
        return Err(CollectorError::fetch(
            table_name,
            format!("upstream error: {}", error),
        ));
    }

    let buckets = response
        .result
        .unwrap_or_default()
        .into_iter()
        .map(|(seconds, rows)| (seconds, rows.unwrap_or_default()))
        .collect();

    Ok(RawSeriesBundle {
        allowance: response.allowance,
        buckets,
    })
}

#[async_trait]
impl MarketDataSource for CryptowatchClient {
    async fn fetch(
        &self,
        series: &Series,
        after: Option<UnixSeconds>,
    ) -> CollectorResult<RawSeriesBundle> {
        let table = series.table_name.as_str();
        let url = ohlc_url(&self.base_url, series, after);

        self.rate_limiter.until_ready().await;
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CollectorError::fetch(table, format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::fetch(table, format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(CollectorError::fetch(
                table,
                format!("HTTP {}: {}", status, snippet),
            ));
        }

        let bundle = decode_response(table, &body)?;

        if let Some(allowance) = bundle.allowance {
            tracing::debug!(
                "Allowance for {}: cost={}, remaining={}",
                table,
                allowance.cost,
                allowance.remaining
            );
        }

        Ok(bundle)
    }
}
