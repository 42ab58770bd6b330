// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry with linear backoff.
//!
//! [`Retry`] is a small state machine that owns the attempt counter and the
//! sleep schedule; [`retry`] drives it for an async operation and cuts pending
//! sleeps short when the cancellation token fires.
//!
//! With the default strategy an operation that keeps failing transiently is
//! tried 3 times, sleeping 1s, 3s and 5s after the successive failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const RETRY_ATTEMPTS: usize = 3;
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);
/// Each backoff is this many units longer than the previous one.
pub const BACKOFF_STEP_FACTOR: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Total attempts, no sleep in between.
    Immediate(usize),
    /// Total attempts; the first sleep is `initial` and every following one
    /// grows by `step`.
    LinearBackoff {
        attempts: usize,
        initial: Duration,
        step: Duration,
    },
}

impl RetryStrategy {
    /// `RETRY_ATTEMPTS` attempts sleeping 1, 3, 5.. `unit`s after failures.
    #[must_use]
    pub fn linear(unit: Duration) -> Self {
        RetryStrategy::LinearBackoff {
            attempts: RETRY_ATTEMPTS,
            initial: unit,
            step: unit * BACKOFF_STEP_FACTOR,
        }
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff { attempts, .. } => {
                (*attempts).max(1)
            }
        }
    }

    /// Sleep that follows the `attempt`-th failure (1-based).
    #[must_use]
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff { initial, step, .. } => {
                let extra = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_add(step.saturating_mul(extra))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::linear(BACKOFF_UNIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `n` (1-based) is about to run or running.
    Attempting(usize),
    /// Attempt `n` failed transiently, sleep for the duration before moving on.
    Backoff(usize, Duration),
    Terminal(Outcome),
}

#[derive(Debug, Clone)]
pub struct Retry {
    strategy: RetryStrategy,
    state: RetryState,
}

impl Retry {
    #[must_use]
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            state: RetryState::Attempting(1),
        }
    }

    #[must_use]
    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn succeeded(&mut self) -> RetryState {
        if let RetryState::Attempting(_) = self.state {
            self.state = RetryState::Terminal(Outcome::Success);
        }
        self.state
    }

    /// Records a failed attempt. Permanent failures end the sequence, transient
    /// ones schedule a backoff.
    pub fn failed(&mut self, transient: bool) -> RetryState {
        if let RetryState::Attempting(attempt) = self.state {
            self.state = if transient {
                RetryState::Backoff(attempt, self.strategy.delay(attempt))
            } else {
                RetryState::Terminal(Outcome::Failure)
            };
        }
        self.state
    }

    pub fn backoff_elapsed(&mut self) -> RetryState {
        if let RetryState::Backoff(attempt, _) = self.state {
            self.state = if attempt < self.strategy.attempts() {
                RetryState::Attempting(attempt + 1)
            } else {
                RetryState::Terminal(Outcome::Failure)
            };
        }
        self.state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },
    #[error("{0}")]
    Permanent(E),
    #[error("cancelled before completion")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt, if one ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Permanent(last) => Some(last),
            RetryError::Cancelled => None,
        }
    }
}

/// Runs `operation` under `strategy`, retrying errors for which `is_transient`
/// holds. The operation receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(
    strategy: &RetryStrategy,
    cancel: &CancellationToken,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut machine = Retry::new(strategy.clone());
    let mut last_error = None;

    loop {
        match machine.state() {
            RetryState::Attempting(attempt) => {
                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled);
                }
                match operation(attempt).await {
                    Ok(value) => {
                        machine.succeeded();
                        return Ok(value);
                    }
                    Err(err) if is_transient(&err) => {
                        if let RetryState::Backoff(_, delay) = machine.failed(true) {
                            warn!(
                                "Attempt {attempt}/{} failed: {err}, backing off for {delay:?}",
                                strategy.attempts()
                            );
                        }
                        last_error = Some(err);
                    }
                    Err(err) => {
                        machine.failed(false);
                        return Err(RetryError::Permanent(err));
                    }
                }
            }
            RetryState::Backoff(_, delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {
                        machine.backoff_elapsed();
                    }
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
            RetryState::Terminal(_) => {
                return match last_error {
                    Some(last) => Err(RetryError::Exhausted {
                        attempts: strategy.attempts(),
                        last,
                    }),
                    None => Err(RetryError::Cancelled),
                };
            }
        }
    }
}
