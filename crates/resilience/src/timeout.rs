//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TimeoutError;

/// Awaits `fut`, giving up once `duration` has elapsed.
pub async fn with_timeout<F>(duration: Duration, fut: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| TimeoutError(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_output_within_budget() {
        let out = with_timeout(Duration::from_millis(100), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn elapses_on_slow_future() {
        let out = with_timeout(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await;
        assert_eq!(out, Err(TimeoutError(Duration::from_millis(10))));
    }
}
