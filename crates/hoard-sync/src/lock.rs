//! Advisory remote lock on `index.lock`.
//!
//! The lock is a plain object: absent or empty means free. There is no
//! compare-and-swap, so two clients that stat at the same moment can both
//! take it. Sync rounds stay correct anyway because index merges commute.

use std::time::{Duration, Instant};

use hoard_core::{HoardError, HoardResult};
use hoard_remote::{RemoteStore, LOCK_KEY};
use tokio_util::sync::CancellationToken;

use crate::retry::sleep;

/// First wait after finding the lock held.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound on a single wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Proof of having written the lock object. Release with [`LockGuard::release`].
#[derive(Debug)]
#[must_use = "a lock that is never released blocks other clients until they time out"]
pub struct LockGuard {
    owner: String,
    acquired: Instant,
}

impl LockGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Delete the lock object. Failures are logged, not returned; a stale
    /// lock only delays other clients until their acquire times out.
    pub async fn release(self, remote: &RemoteStore) {
        // Independent of the round's token so a canceled round still unlocks
        match remote.delete(&CancellationToken::new(), LOCK_KEY).await {
            Ok(()) => tracing::debug!(
                owner = %self.owner,
                held_ms = self.acquired.elapsed().as_millis() as u64,
                "released sync lock"
            ),
            Err(e) => {
                tracing::warn!(owner = %self.owner, error = %e, "failed to release sync lock");
            }
        }
    }
}

/// Wait for the lock to be free, then take it.
///
/// Polls with exponential backoff (capped at [`MAX_BACKOFF`]) and gives up
/// with `RemoteLocked` once `timeout` would be exceeded.
pub async fn acquire(
    remote: &RemoteStore,
    cancel: &CancellationToken,
    timeout: Duration,
) -> HoardResult<LockGuard> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut delay = INITIAL_BACKOFF;

    loop {
        match remote.stat(cancel, LOCK_KEY).await {
            Ok(None) | Ok(Some(0)) => break,
            Ok(Some(_)) => {
                tracing::debug!(
                    waited_ms = start.elapsed().as_millis() as u64,
                    "sync lock held"
                );
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "sync lock stat failed");
            }
            Err(e) => return Err(e),
        }

        if Instant::now() + delay > deadline {
            tracing::debug!(
                timeout_ms = timeout.as_millis() as u64,
                "gave up waiting for sync lock"
            );
            return Err(HoardError::RemoteLocked);
        }
        sleep(cancel, delay).await?;
        delay = (delay * 2).min(MAX_BACKOFF);
    }

    let owner = uuid::Uuid::new_v4().to_string();
    remote.put(cancel, LOCK_KEY, owner.clone().into_bytes()).await?;
    tracing::debug!(
        owner = %owner,
        waited_ms = start.elapsed().as_millis() as u64,
        "acquired sync lock"
    );
    Ok(LockGuard {
        owner,
        acquired: Instant::now(),
    })
}
