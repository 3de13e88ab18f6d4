//! Bounded retry with a fixed backoff schedule.
//!
//! Both the agent shipper and the SQL storage retry transient failures on
//! the same `[1s, 3s, 5s]` schedule: one initial attempt plus one attempt
//! after each step. Sleeps observe a [`CancellationToken`] so shutdown
//! never waits out a backoff step.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The schedule shared by the agent and the SQL retry wrapper.
pub const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Outcome of a retried operation that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with a permanent error, or the schedule ran out.
    Failed { error: E, attempts: usize },
    /// Cancellation fired while waiting between attempts.
    Cancelled { last_error: E, attempts: usize },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Failed { error, .. } => error,
            RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `is_transient` rejects,
/// or `schedule` is exhausted. At most `schedule.len() + 1` attempts are made.
pub async fn retry<T, E, F, Fut, P>(
    schedule: &[Duration],
    cancel: &CancellationToken,
    is_transient: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut steps = schedule.iter();
    loop {
        attempts += 1;
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_transient(&error) {
            return Err(RetryError::Failed { error, attempts });
        }
        let Some(delay) = steps.next() else {
            return Err(RetryError::Failed { error, attempts });
        };
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { last_error: error, attempts });
        }

        tracing::warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { last_error: error, attempts });
            }
            _ = tokio::time::sleep(*delay) => {}
        }
    }
}
