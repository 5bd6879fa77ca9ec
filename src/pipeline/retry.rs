use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

/// Run `op`, retrying transient infrastructure errors with a fixed backoff.
///
/// Non-transient errors are returned immediately.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "{label} failed ({e}), retry {attempt}/{} in {:?}",
                    policy.max_retries, policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ShipgateError;

    const POLICY: RetryPolicy = RetryPolicy {
        max_retries: 2,
        backoff: Duration::ZERO,
    };

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = with_retries(POLICY, "deploy", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ShipgateError::InfraApi("503".to_string()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = with_retries(POLICY, "deploy", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ShipgateError::InfraApi("503".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ShipgateError::InfraApi(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = with_retries(POLICY, "deploy", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ShipgateError::Api("404 Not Found".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ShipgateError::Api(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
