//! Receipt polling. Turns point-in-time `get_receipt` snapshots into a
//! "wait until this transaction is at least X" primitive.
//!
//! ## Timing
//!
//! * This is the only place in the bridge that sleeps.
//! * Between attempts the poller waits `interval`, or an exponentially
//!   growing delay capped at `max_interval` when configured that way.
//! * A transport failure on one read uses up one attempt and is retried;
//!   any other read failure ends the wait immediately.
//! * Cancellation is checked around every read and every sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::PollError;
use crate::rpc::ChainClient;
use crate::status::{reached, Progress, TransactionReceipt, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Double the delay after every attempt, never exceeding `cap`.
    Exponential { cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    interval: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl PollingPolicy {
    /// Returns `None` unless `interval > 0` and `max_attempts >= 1`.
    pub fn new(interval: Duration, max_attempts: u32, backoff: Backoff) -> Option<Self> {
        if interval.is_zero() || max_attempts == 0 {
            return None;
        }
        Some(Self {
            interval,
            max_attempts,
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Same timing, different attempt budget (clamped to at least one).
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Delay to wait after the given (1-based) attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { cap } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.interval.saturating_mul(factor).min(cap.max(self.interval))
            }
        }
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 100,
            backoff: Backoff::Fixed,
        }
    }
}

pub struct ReceiptPoller<C: ?Sized> {
    client: Arc<C>,
}

impl<C: ?Sized> Clone for ReceiptPoller<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<C: ChainClient + ?Sized> ReceiptPoller<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Poll `hash` until it reaches `target`, dies, the policy's attempt
    /// budget is spent, or `cancel` fires.
    pub async fn await_status(
        &self,
        hash: &str,
        target: TransactionStatus,
        policy: &PollingPolicy,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt, PollError> {
        let mut last_status = None;

        for attempt in 1..=policy.max_attempts() {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(hash)),
                read = self.client.get_receipt(hash) => read,
            };

            match read {
                Ok(receipt) => {
                    debug!(hash, attempt, status = %receipt.status, "observed receipt");
                    match reached(receipt.status, target) {
                        Progress::Reached => return Ok(receipt),
                        Progress::Failed(status) => {
                            return Err(PollError::TransactionFailed {
                                hash: hash.to_string(),
                                status,
                                receipt: Box::new(receipt),
                            })
                        }
                        Progress::Waiting => last_status = Some(receipt.status),
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(hash, attempt, "receipt read failed, will retry: {e}");
                }
                Err(e) => {
                    return Err(PollError::Chain {
                        hash: hash.to_string(),
                        source: e,
                    })
                }
            }

            if attempt < policy.max_attempts() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(hash)),
                    _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
                }
            }
        }

        Err(PollError::Timeout {
            hash: hash.to_string(),
            target,
            attempts: policy.max_attempts(),
            last_status,
        })
    }
}

fn cancelled(hash: &str) -> PollError {
    PollError::Cancelled {
        hash: hash.to_string(),
    }
}
