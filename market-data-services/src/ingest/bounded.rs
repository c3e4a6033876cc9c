use std::future::Future;
use std::time::Duration;

use market_core::{CollectorError, CollectorResult};
use tokio_util::sync::CancellationToken;

/// Time and cancellation budget applied to every external call of a run
#[derive(Debug, Clone)]
pub struct CallBudget {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallBudget {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` until it completes, the timeout elapses or the run is
    /// cancelled, whichever comes first. Cancellation wins ties.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> CollectorResult<T>
    where
        F: Future<Output = CollectorResult<T>>,
    {
        bounded(operation, self.timeout, &self.cancel, fut).await
    }
}

pub async fn bounded<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> CollectorResult<T>
where
    F: Future<Output = CollectorResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(CollectorError::Cancelled {
            operation: operation.to_string(),
        });
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollectorError::Cancelled {
            operation: operation.to_string(),
        }),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(inner) => inner,
            Err(_) => {
                tracing::warn!("{} timed out after {:?}", operation, timeout);
                Err(CollectorError::Timeout {
                    operation: operation.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        },
    }
}
