//! Retry logic with exponential backoff
//!
//! This module provides the bounded retry executor used for connecting and
//! uploading. Each run starts with fresh state: the first attempt plus up to
//! `retry_limit` retries, waits growing from `initial_wait` and capped at
//! `max_wait`, and a classifier deciding whether a failure is worth retrying.
//!
//! # Example
//!
//! ```no_run
//! use ftp_output::retry::{Classification, RetryPolicy, retry_fn};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> ftp_output::Result<()> {
//! let policy = RetryPolicy::default();
//! let cancel = CancellationToken::new();
//! let value = retry_fn(
//!     &policy,
//!     &cancel,
//!     "example",
//!     |_| Classification::Transient,
//!     || async { Ok::<_, ftp_output::Error>(42) },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Maximum length of the failure reason quoted in retry warnings
const REASON_MAX_LEN: usize = 200;

/// Every n-th retry logs the full error chain
const FULL_TRACE_EVERY: u32 = 3;

/// Outcome of classifying a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Worth another attempt
    Transient,
    /// Further attempts can't succeed; surface the error now
    Fatal,
}

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
///
/// Only the failures that can never succeed on a later attempt are permanent;
/// everything the server or the network throws at us is retried.
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Configuration and logical errors are permanent
            Error::Config { .. } => false,
            // Cancellation must propagate immediately
            Error::Interrupted => false,
            // Lifecycle misuse won't fix itself
            Error::InvalidState { .. } => false,
            // An exhausted nested budget is final
            Error::RetryGiveup { .. } => false,
            // Protocol, network and local read failures are retried
            Error::Ftp(_) => true,
            Error::Io(_) => true,
        }
    }
}

/// Retry limits and backoff for one kind of operation
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub retry_limit: u32,
    /// Wait before the first retry
    pub initial_wait: Duration,
    /// Upper bound for any single wait
    pub max_wait: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to waits (still capped at `max_wait`)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(10, &RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from the backoff configuration and a retry count
    pub fn from_config(retry_limit: u32, config: &RetryConfig) -> Self {
        Self {
            retry_limit,
            initial_wait: config.initial_wait,
            max_wait: config.max_wait,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Wait before retry number `retry` (1-based), without jitter
    ///
    /// Non-decreasing in `retry` and never above `max_wait`.
    pub fn wait_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.initial_wait.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_wait.as_secs_f64() {
            self.max_wait
        } else {
            Duration::from_secs_f64(secs).min(self.max_wait)
        }
    }

    /// Wait before retry number `retry`, given the wait used before it
    ///
    /// Applies jitter when enabled. Never shorter than `previous`, so
    /// jitter can't shrink the wait below an earlier one even when the
    /// multiplier is below 2.0.
    pub fn next_wait(&self, retry: u32, previous: Duration) -> Duration {
        let base = self.wait_for_retry(retry);
        let wait = if self.jitter { add_jitter(base) } else { base };
        wait.max(previous).min(self.max_wait)
    }
}

/// An operation the retry executor can run repeatedly
#[async_trait]
pub trait Retryable: Send {
    /// Value produced by a successful attempt
    type Output: Send;

    /// Short name used in log lines (e.g. "FTP connect")
    fn operation(&self) -> &str;

    /// Run one attempt
    async fn call(&mut self) -> Result<Self::Output, Error>;

    /// Decide whether a failed attempt may be retried
    fn classify(&self, error: &Error) -> Classification {
        if error.is_retryable() {
            Classification::Transient
        } else {
            Classification::Fatal
        }
    }
}

/// Execute a [`Retryable`] with bounded retries and exponential backoff
///
/// # Returns
///
/// - the first successful result
/// - the original error if it is classified fatal
/// - [`Error::RetryGiveup`] wrapping the last error once the budget is spent
/// - [`Error::Interrupted`] if `cancel` fires while an attempt runs or while waiting
pub async fn run<R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    task: &mut R,
) -> Result<R::Output, Error>
where
    R: Retryable + ?Sized,
{
    let mut retries = 0;
    let mut wait = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Interrupted),
            outcome = task.call() => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                if retries > 0 {
                    info!(
                        operation = task.operation(),
                        attempts = retries + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(Error::Interrupted) => return Err(Error::Interrupted),
            Err(e) => e,
        };

        if task.classify(&err) == Classification::Fatal {
            error!(
                operation = task.operation(),
                error = %err,
                "Operation failed with non-retryable error"
            );
            return Err(err);
        }

        if retries >= policy.retry_limit {
            error!(
                operation = task.operation(),
                error = %err,
                attempts = retries + 1,
                "Operation failed after all retry attempts exhausted"
            );
            return Err(Error::RetryGiveup {
                attempts: retries + 1,
                last: Box::new(err),
            });
        }

        retries += 1;
        wait = policy.next_wait(retries, wait);

        let reason = truncate_reason(&err.to_string());
        if retries % FULL_TRACE_EVERY == 0 {
            warn!(
                operation = task.operation(),
                attempt = retries,
                retry_limit = policy.retry_limit,
                wait_ms = wait.as_millis() as u64,
                reason = %reason,
                error = ?err,
                "Operation failed, retrying"
            );
        } else {
            warn!(
                operation = task.operation(),
                attempt = retries,
                retry_limit = policy.retry_limit,
                wait_ms = wait.as_millis() as u64,
                reason = %reason,
                "Operation failed, retrying"
            );
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Interrupted),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

struct FnRetryable<'a, F, C> {
    operation: &'a str,
    classifier: C,
    call: F,
}

#[async_trait]
impl<F, Fut, T, C> Retryable for FnRetryable<'_, F, C>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, Error>> + Send,
    T: Send,
    C: Fn(&Error) -> Classification + Send + Sync,
{
    type Output = T;

    fn operation(&self) -> &str {
        self.operation
    }

    async fn call(&mut self) -> Result<T, Error> {
        (self.call)().await
    }

    fn classify(&self, error: &Error) -> Classification {
        (self.classifier)(error)
    }
}

/// Closure form of [`run`]
///
/// `call` produces one attempt's future; `classifier` decides whether a
/// failure may be retried.
pub async fn retry_fn<F, Fut, T, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    classifier: C,
    call: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, Error>> + Send,
    T: Send,
    C: Fn(&Error) -> Classification + Send + Sync,
{
    let mut task = FnRetryable {
        operation,
        classifier,
        call,
    };
    run(policy, cancel, &mut task).await
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= REASON_MAX_LEN {
        return reason.to_string();
    }
    let mut truncated: String = reason.chars().take(REASON_MAX_LEN).collect();
    truncated.push_str("...");
    truncated
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
