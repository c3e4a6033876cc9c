use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{CollectorError, CollectorResult};
use serde::Serialize;
use std::time::Duration;

use super::orchestrator::RunFailure;

/// Where a failure came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub project_id: String,
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl SourceContext {
    pub fn new(project_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            function_name: function_name.into(),
            table_name: None,
            stage: None,
        }
    }
}

/// Structured failure message delivered to the external notifier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub source_context: SourceContext,
    pub event_time: DateTime<Utc>,
    pub error_text: String,
}

impl FailureReport {
    pub fn from_run_failure(context: &SourceContext, failure: &RunFailure) -> Self {
        let mut source_context = context.clone();
        source_context.table_name = failure.table_name.clone();
        source_context.stage = Some(failure.stage.to_string());

        Self {
            source_context,
            event_time: Utc::now(),
            error_text: format!("[{}] {}", failure.error.code(), failure),
        }
    }

    pub fn from_error(context: &SourceContext, error: &CollectorError) -> Self {
        Self {
            source_context: context.clone(),
            event_time: Utc::now(),
            error_text: format!("[{}] {}", error.code(), error),
        }
    }
}

#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report_failure(&self, report: &FailureReport) -> CollectorResult<()>;
}

/// Reporter that only logs; used when no webhook is configured
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl FailureReporter for LogReporter {
    async fn report_failure(&self, report: &FailureReport) -> CollectorResult<()> {
        tracing::error!(
            "Collector failure: project={}, function={}, table={}, stage={}, at={}: {}",
            report.source_context.project_id,
            report.source_context.function_name,
            report.source_context.table_name.as_deref().unwrap_or("-"),
            report.source_context.stage.as_deref().unwrap_or("-"),
            report.event_time.to_rfc3339(),
            report.error_text
        );
        Ok(())
    }
}

/// Reporter posting the report as JSON to a webhook
pub struct WebhookReporter {
    http: reqwest::Client,
    url: String,
}

impl WebhookReporter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> CollectorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FailureReporter for WebhookReporter {
    async fn report_failure(&self, report: &FailureReport) -> CollectorResult<()> {
        let response = self
            .http
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| CollectorError::Report(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Report(format!(
                "webhook returned HTTP {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Forward a report exactly once.
///
/// Returns the error the run should terminate with: the original failure
/// when delivery worked, or the delivery error when it did not. A delivery
/// failure is logged here and never re-enters the reporter.
pub async fn deliver_report(
    reporter: &dyn FailureReporter,
    report: &FailureReport,
    original: CollectorError,
) -> CollectorError {
    match reporter.report_failure(report).await {
        Ok(()) => original,
        Err(report_error) => {
            tracing::error!(
                "Failed to deliver failure report ({}); original failure: {}",
                report_error,
                report.error_text
            );
            report_error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingReporter {
        reports: Mutex<Vec<FailureReport>>,
        fail: bool,
    }

    #[async_trait]
    impl FailureReporter for RecordingReporter {
        async fn report_failure(&self, report: &FailureReport) -> CollectorResult<()> {
            self.reports.lock().unwrap().push(report.clone());
            if self.fail {
                Err(CollectorError::Report("notifier down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = FailureReport {
            source_context: SourceContext::new("my-project", "CollectBtcMarketPrice"),
            event_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            error_text: "boom".to_string(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sourceContext"]["projectId"], "my-project");
        assert_eq!(json["sourceContext"]["functionName"], "CollectBtcMarketPrice");
        assert!(json["sourceContext"].get("tableName").is_none());
        assert_eq!(json["errorText"], "boom");
        assert_eq!(json["eventTime"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_from_error_prefixes_code() {
        let ctx = SourceContext::new("p", "f");
        let report = FailureReport::from_error(&ctx, &CollectorError::Config("no project".into()));
        assert!(report.error_text.starts_with("[CONFIG]"));
    }

    #[tokio::test]
    async fn test_delivered_report_returns_original_error() {
        let reporter = RecordingReporter {
            reports: Mutex::new(Vec::new()),
            fail: false,
        };
        let ctx = SourceContext::new("p", "f");
        let original = CollectorError::StoreRead("offline".into());
        let report = FailureReport::from_error(&ctx, &original);

        let terminal = deliver_report(&reporter, &report, original).await;

        assert!(matches!(terminal, CollectorError::StoreRead(_)));
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_terminal_and_not_retried() {
        let reporter = RecordingReporter {
            reports: Mutex::new(Vec::new()),
            fail: true,
        };
        let ctx = SourceContext::new("p", "f");
        let original = CollectorError::StoreRead("offline".into());
        let report = FailureReport::from_error(&ctx, &original);

        let terminal = deliver_report(&reporter, &report, original).await;

        assert!(matches!(terminal, CollectorError::Report(_)));
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_non_success_status_is_report_error() {
        let base = crate::ingest::test_http::serve_once("503 Service Unavailable", "down").await;
        let reporter = WebhookReporter::new(format!("{}/hook", base), Duration::from_secs(5)).unwrap();
        let report = FailureReport::from_error(
            &SourceContext::new("p", "f"),
            &CollectorError::StoreRead("offline".into()),
        );

        let err = reporter.report_failure(&report).await.unwrap_err();
        assert_eq!(err.code(), "REPORT");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_webhook_accepts_success_status() {
        let base = crate::ingest::test_http::serve_once("200 OK", "{}").await;
        let reporter = WebhookReporter::new(format!("{}/hook", base), Duration::from_secs(5)).unwrap();
        let report = FailureReport::from_error(
            &SourceContext::new("p", "f"),
            &CollectorError::Config("x".into()),
        );

        assert!(reporter.report_failure(&report).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_reporter_never_fails() {
        let ctx = SourceContext::new("p", "f");
        let report = FailureReport::from_error(&ctx, &CollectorError::Config("x".into()));
        assert!(LogReporter.report_failure(&report).await.is_ok());
    }
}
