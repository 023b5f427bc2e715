//! Retry policy for the transport client.

use reqwest::Method;
use std::time::Duration;

/// Which requests are retried, how often and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Additional attempts after the first one.
  pub max_retries: u32,
  /// Statuses considered transient.
  pub retryable_status_codes: Vec<u16>,
  /// Delay before the first retry; doubled for each subsequent one.
  pub initial_backoff: Duration,
  /// Upper bound for any single delay, including `Retry-After`.
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      retryable_status_codes: vec![408, 413, 429, 500, 502, 503, 504],
      initial_backoff: Duration::from_millis(300),
      max_backoff: Duration::from_secs(3),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      ..Self::default()
    }
  }

  /// Only idempotent methods are retried. POST never is.
  pub fn allows_method(&self, method: &Method) -> bool {
    matches!(
      *method,
      Method::GET | Method::PUT | Method::DELETE | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
  }

  pub fn allows_status(&self, status: u16) -> bool {
    self.retryable_status_codes.contains(&status)
  }

  /// Delay before retry number `retry` (0-based).
  ///
  /// A server-provided `Retry-After` wins over the computed backoff; both are
  /// capped at `max_backoff`.
  pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
    let computed = self
      .initial_backoff
      .checked_mul(2u32.saturating_pow(retry))
      .unwrap_or(self.max_backoff);
    retry_after.unwrap_or(computed).min(self.max_backoff)
  }
}
