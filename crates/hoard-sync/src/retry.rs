//! Retry policies for remote operations.
//!
//! Only transient errors ([`HoardError::is_transient`]) are retried;
//! integrity and auth failures surface immediately.

use std::future::Future;
use std::time::Duration;

use hoard_core::{HoardError, HoardResult};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    /// Doubles from `base` up to `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn constant(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Constant(delay),
        }
    }

    pub fn exponential(attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Constant(d) => d,
            Backoff::Exponential { base, max } => base
                .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
                .unwrap_or(max)
                .min(max),
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        mut op: F,
    ) -> HoardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HoardResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay(attempt - 1);
                    let delay_ms = delay.as_millis() as u64;
                    if e.is_expected() {
                        tracing::debug!(what, attempt, attempts, delay_ms, error = %e, "retrying");
                    } else {
                        tracing::warn!(what, attempt, attempts, delay_ms, error = %e, "retrying");
                    }
                    sleep(cancel, delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep unless canceled first.
pub async fn sleep(cancel: &CancellationToken, delay: Duration) -> HoardResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HoardError::Canceled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
