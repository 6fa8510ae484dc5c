//! Delay schedules shared by the queues.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound for any single pause.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Upper bound for a pause while the entity store is unreachable.
pub const MAX_STORE_PAUSE: Duration = Duration::from_secs(60);

const STORE_RETRY_ATTEMPTS: u32 = 5;

/// `base * 2^(attempt - 1)`, capped at `cap`. `attempt` is 1-based.
pub fn exponential(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Pause schedule for a queue while the entity store is unreachable.
#[derive(Debug)]
pub struct StoreBackoff {
    base: Duration,
    attempt: u32,
}

impl StoreBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        exponential(self.base.max(Duration::from_millis(1)), self.attempt, MAX_STORE_PAUSE)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Retries `op` while it fails with `StoreUnavailable`, up to a fixed budget.
/// Used at startup, where giving up halts the engine.
pub async fn retry_store<T, F, Fut>(op_name: &'static str, base: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = StoreBackoff::new(base);
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_store_unavailable() && attempt < STORE_RETRY_ATTEMPTS => {
                let delay = backoff.next_delay();
                attempt += 1;
                debug!(
                    "store unavailable during {}, retrying in {:?} (attempt {}/{})",
                    op_name, delay, attempt, STORE_RETRY_ATTEMPTS
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Retries `op` for as long as the store is unavailable. Used by a worker
/// holding a claim: the outcome must land or the video stays stuck.
///
/// Only `shutdown` ends the wait early. The last error is then returned and
/// the video keeps its transient state for recovery to reset.
pub async fn retry_claimed<T, F, Fut>(
    op_name: &'static str,
    base: Duration,
    shutdown: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = StoreBackoff::new(base);
    loop {
        match op().await {
            Err(err) if err.is_store_unavailable() && !shutdown.is_cancelled() => {
                let delay = backoff.next_delay();
                warn!(op = op_name, error = %err, ?delay, "store unavailable while holding a claim, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = sleep(delay) => {}
                }
            }
            other => return other,
        }
    }
}
