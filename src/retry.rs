//! Retry logic with exponential backoff and error-class short-circuiting.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Classification hook the retry policy uses to decide whether to keep going.
pub trait Retryable {
  /// Terminal errors are returned immediately, whatever budget remains.
  fn is_terminal(&self) -> bool;
}

/// Bounded exponential-backoff retry.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// sleep of `base_delay * 2^(n-1)`, so the defaults wait 1s then 2s before
/// the third and final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total number of attempts, including the first one.
  pub max_attempts: u32,
  /// Delay before the second attempt; doubles for each later one.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(1),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts,
      base_delay,
    }
  }

  /// A policy that runs the operation exactly once.
  pub fn no_retry() -> Self {
    Self::new(1, Duration::ZERO)
  }

  /// Sleep that follows a failed `attempt` (1-based).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base_delay.saturating_mul(factor)
  }

  /// Run `operation` until it succeeds, fails terminally, or the budget runs out.
  ///
  /// The backoff sleep is a tokio timer: dropping the returned future cancels
  /// any pending sleep along with the in-flight attempt.
  pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
  {
    // Zero would mean "never try"; treat it as a single attempt.
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      let err = match operation().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
      };

      if err.is_terminal() {
        debug!(attempt, error = %err, "Terminal error, not retrying");
        return Err(err);
      }

      if attempt >= max_attempts {
        warn!(attempt, error = %err, "Retry budget exhausted");
        return Err(err);
      }

      let delay = self.delay_for_attempt(attempt);
      warn!(
        attempt,
        max_attempts,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "Attempt failed, backing off"
      );
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use tokio::time::Instant;

  #[derive(Debug, Clone, PartialEq)]
  enum TestError {
    Flaky,
    Fatal,
  }

  impl Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{:?}", self)
    }
  }

  impl Retryable for TestError {
    fn is_terminal(&self) -> bool {
      matches!(self, TestError::Fatal)
    }
  }

  #[test]
  fn test_default_schedule() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
  }

  #[test]
  fn test_delay_saturates() {
    let policy = RetryPolicy::new(100, Duration::from_secs(1));
    assert_eq!(policy.delay_for_attempt(80), Duration::from_secs(u32::MAX as u64));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retryable_error_exhausts_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let start = Instant::now();

    let counter = calls.clone();
    let result: Result<(), TestError> = policy
      .run(|| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(TestError::Flaky) }
      })
      .await;

    assert_eq!(result, Err(TestError::Flaky));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 100ms + 200ms of backoff, nothing after the last attempt
    assert_eq!(start.elapsed(), Duration::from_millis(300));
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_error_short_circuits() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(10, Duration::from_secs(1));
    let start = Instant::now();

    let counter = calls.clone();
    let result: Result<(), TestError> = policy
      .run(|| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(TestError::Fatal) }
      })
      .await;

    assert_eq!(result, Err(TestError::Fatal));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovers_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::default();

    let counter = calls.clone();
    let result = policy
      .run(|| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
          if n < 3 {
            Err(TestError::Flaky)
          } else {
            Ok(n)
          }
        }
      })
      .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_after_retryable_stops() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(5, Duration::from_millis(10));

    let counter = calls.clone();
    let result: Result<(), TestError> = policy
      .run(|| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err(TestError::Flaky)
          } else {
            Err(TestError::Fatal)
          }
        }
      })
      .await;

    assert_eq!(result, Err(TestError::Fatal));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_zero_attempts_runs_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(0, Duration::from_secs(60));

    let counter = calls.clone();
    let result: Result<(), TestError> = policy
      .run(|| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(TestError::Flaky) }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_future_cancels_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(3, Duration::from_secs(60));

    let counter = calls.clone();
    let run = policy.run(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Err::<(), _>(TestError::Flaky) }
    });

    let outcome = tokio::time::timeout(Duration::from_secs(1), run).await;
    assert!(outcome.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
