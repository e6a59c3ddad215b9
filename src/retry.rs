//! Bounded fixed-interval polling
//!
//! This module provides the retry policy used while waiting for an export job
//! to finish. It is independent of HTTP: the operation is any async closure
//! reporting [`PollOutcome::Ready`] or [`PollOutcome::Pending`], and errors are
//! classified through [`IsRetryable`].
//!
//! Each attempt runs to completion before the next one starts. The pause
//! between attempts is the only suspension point and can be interrupted
//! through a [`CancellationToken`].
//!
//! # Example
//!
//! ```no_run
//! use usage_export::config::PollConfig;
//! use usage_export::retry::{IsRetryable, PollOutcome, poll_until_ready};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let config = PollConfig::default();
//! let cancel = CancellationToken::new();
//! let value = poll_until_ready(&config, &cancel, |_attempt| async {
//!     Ok::<_, Flaky>(PollOutcome::Ready(42))
//! })
//! .await;
//! # }
//! ```

use crate::config::PollConfig;
use crate::error::Error;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// A retryable error consumes one attempt of the budget; any other error ends
/// polling immediately.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // No response at all: connection refused, DNS, timeouts
            Error::Transport { .. } => true,
            // Throttling and server-side hiccups
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // Terminal job states and caller errors are permanent
            Error::Config { .. }
            | Error::Submission { .. }
            | Error::InvalidResponse { .. }
            | Error::PollTimeout { .. }
            | Error::JobFailed { .. }
            | Error::Cancelled { .. }
            | Error::ArtifactsFailed { .. }
            | Error::HttpClient(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Result of one polling attempt
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The awaited state was reached
    Ready(T),
    /// Not there yet, poll again after the interval
    Pending,
}

/// Why polling stopped without a ready value
#[derive(Debug)]
pub enum PollError<E> {
    /// Every attempt was used up
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt, when it failed instead of reporting pending
        last_error: Option<E>,
    },
    /// The cancellation token fired
    Cancelled {
        /// Number of attempts completed before cancellation
        attempts: u32,
    },
    /// A non-retryable error
    Fatal {
        /// Attempt on which the error occurred
        attempt: u32,
        /// The error
        error: E,
    },
}

/// Run `operation` until it reports ready, the budget runs out, or `cancel` fires
///
/// The operation receives the 1-based attempt number. At most
/// `config.max_attempts` calls are made and `config.interval` elapses between
/// consecutive calls; there is no pause after the final attempt.
pub async fn poll_until_ready<F, Fut, T, E>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts: attempt - 1,
            });
        }

        match operation(attempt).await {
            Ok(PollOutcome::Ready(value)) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "Polling finished after retries");
                }
                return Ok(value);
            }
            Ok(PollOutcome::Pending) => {
                last_error = None;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    "Poll attempt failed, will retry"
                );
                last_error = Some(e);
            }
            Err(e) => {
                tracing::error!(error = %e, attempt = attempt, "Polling failed with non-retryable error");
                return Err(PollError::Fatal { attempt, error: e });
            }
        }

        if attempt < config.max_attempts {
            tracing::debug!(
                attempt = attempt,
                delay_secs = config.interval.as_secs_f64(),
                "Waiting before next poll"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PollError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    Err(PollError::Exhausted {
        attempts: config.max_attempts,
        last_error,
    })
}
