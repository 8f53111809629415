//! Bounded async polling.
//!
//! `poll_until` runs a check at a fixed interval until it reports a value,
//! the attempt budget or deadline runs out, or the optional cancellation
//! signal fires. Check errors end the wait immediately.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::controller::error::Error;

/// Result of one polling attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Limits for a polling loop.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock bound on top of the attempt count.
    pub deadline: Option<Duration>,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("deadline of {deadline:?} exceeded after {attempts} attempts")]
    DeadlineExceeded { deadline: Duration, attempts: u32 },

    #[error("wait cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error(transparent)]
    Check(#[from] Error),
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Poll `check` until it returns `Poll::Ready`.
///
/// The check receives the 1-based attempt number. There is no sleep after
/// the final attempt.
pub async fn poll_until<T, F, Fut>(
    config: &PollConfig,
    mut cancel: Option<watch::Receiver<bool>>,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Poll<T>, Error>>,
{
    let started = Instant::now();

    for attempt in 1..=config.max_attempts {
        if is_cancelled(&cancel) {
            return Err(WaitError::Cancelled {
                attempts: attempt - 1,
            });
        }
        if let Some(deadline) = config.deadline
            && started.elapsed() >= deadline
        {
            return Err(WaitError::DeadlineExceeded {
                deadline,
                attempts: attempt - 1,
            });
        }

        if let Poll::Ready(value) = check(attempt).await? {
            return Ok(value);
        }

        if attempt == config.max_attempts {
            break;
        }

        match cancel.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.interval) => {}
                    changed = rx.changed() => {
                        // A dropped sender can no longer cancel; finish the interval.
                        if changed.is_err() {
                            tokio::time::sleep(config.interval).await;
                            cancel = None;
                        }
                    }
                }
            }
            None => tokio::time::sleep(config.interval).await,
        }
    }

    Err(WaitError::Exhausted {
        attempts: config.max_attempts,
    })
}
