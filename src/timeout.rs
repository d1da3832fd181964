//! Timeout policy for calls to external collaborators.
//!
//! There is no cancellation protocol with the provider: when the deadline passes the
//! call future is dropped and the caller sees [`TimedOut`].

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Longest accepted timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);
/// Default deadline for a generation call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {elapsed:?} (limit: {timeout:?})")]
pub struct TimedOut {
    pub elapsed: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout must be non-zero")]
    Zero,
    #[error("timeout {0:?} exceeds the maximum of {:?}", MAX_TIMEOUT)]
    TooLong(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: DEFAULT_PROVIDER_TIMEOUT }
    }
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::Zero);
        }
        if duration > MAX_TIMEOUT {
            return Err(TimeoutError::TooLong(duration));
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, TimedOut>
    where
        Fut: Future<Output = T>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(value) => Ok(value),
            Err(_) => Err(TimedOut { elapsed: start.elapsed(), timeout: self.duration }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_oversized() {
        assert_eq!(TimeoutPolicy::new(Duration::ZERO).unwrap_err(), TimeoutError::Zero);
        assert!(matches!(
            TimeoutPolicy::new(Duration::from_secs(601)),
            Err(TimeoutError::TooLong(_))
        ));
        assert_eq!(TimeoutPolicy::default().duration(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_before_deadline() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100)).unwrap();
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                42
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();
        let err = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                42
            })
            .await
            .unwrap_err();
        assert_eq!(err.timeout, Duration::from_millis(50));
        assert!(err.elapsed >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn inner_results_pass_through() {
        let policy = TimeoutPolicy::default();
        let result: Result<Result<(), &str>, TimedOut> = policy.execute(|| async { Err("boom") }).await;
        assert_eq!(result.unwrap(), Err("boom"));
    }
}
