//! Sync rounds between a local store and a remote object store.
//!
//! One round:
//!   1. take the advisory lock
//!   2. fetch and decrypt the remote index (absent on first sync)
//!   3. merge it into the local index and persist
//!   4. encrypt the merged index for the recipient set and upload it
//!   5. download referenced blobs missing locally, upload local blobs
//!      missing remotely
//!   6. release the lock
//!
//! Blob transfers are retried individually; any blob that still fails
//! turns the round into `SyncPartial` after the merged index is installed.

use std::time::Duration;

use hoard_core::config::RemoteConfig;
use hoard_core::{ensure_active, HoardError, HoardResult};
use hoard_crypto::Xc;
use hoard_remote::{RemoteStore, INDEX_KEY};
use hoard_store::blob::{self, blob_path, hash_from_path};
use hoard_store::{Index, Store};
use tokio_util::sync::CancellationToken;

use crate::lock;
use crate::retry::RetryPolicy;

/// Knobs for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ceiling on waiting for the remote lock
    pub lock_timeout: Duration,
    /// Attempts of a whole round
    pub attempts: u32,
    /// Constant delay between rounds
    pub round_delay: Duration,
    /// Attempts per blob transfer
    pub blob_attempts: u32,
    /// First backoff between blob attempts (doubles, capped at 2s)
    pub blob_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            attempts: 3,
            round_delay: Duration::from_secs(1),
            blob_attempts: 3,
            blob_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&RemoteConfig> for SyncOptions {
    fn from(remote: &RemoteConfig) -> Self {
        Self {
            lock_timeout: Duration::from_secs(remote.lock_timeout_secs),
            attempts: remote.sync_attempts,
            blob_attempts: remote.blob_attempts,
            ..Self::default()
        }
    }
}

/// Outcome of a successful round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries in the merged index
    pub entries: usize,
    pub downloaded: usize,
    pub uploaded: usize,
}

/// Everything a round needs, borrowed from the caller.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub store: &'a Store,
    pub xc: &'a Xc,
    pub recipients: &'a [String],
    pub remote: &'a RemoteStore,
    pub options: &'a SyncOptions,
}

/// Run sync rounds until one completes (or fails permanently).
pub async fn sync(cancel: &CancellationToken, ctx: SyncContext<'_>) -> HoardResult<SyncReport> {
    tracing::debug!("trying to sync index");
    let policy = RetryPolicy::constant(ctx.options.attempts, ctx.options.round_delay);
    let report = policy
        .run(cancel, "sync round", move || sync_round(cancel, ctx))
        .await?;
    tracing::info!(
        entries = report.entries,
        downloaded = report.downloaded,
        uploaded = report.uploaded,
        "sync complete"
    );
    Ok(report)
}

/// A single round under the remote lock.
pub async fn sync_round(
    cancel: &CancellationToken,
    ctx: SyncContext<'_>,
) -> HoardResult<SyncReport> {
    ensure_active(cancel)?;
    let guard = lock::acquire(ctx.remote, cancel, ctx.options.lock_timeout).await?;
    let result = locked_round(cancel, ctx).await;
    guard.release(ctx.remote).await;
    result
}

async fn locked_round(
    cancel: &CancellationToken,
    ctx: SyncContext<'_>,
) -> HoardResult<SyncReport> {
    let remote_index = match ctx.remote.get_optional(cancel, INDEX_KEY).await? {
        Some(ciphertext) => {
            let plain = ctx.xc.decrypt(cancel, &ciphertext)?;
            Index::from_bytes(&plain)?
        }
        None => {
            tracing::debug!("no remote index yet");
            Index::new("")
        }
    };

    let merged = ctx.store.merge_index(cancel, &remote_index)?;
    let ciphertext = ctx.xc.encrypt(cancel, &merged.to_bytes(), ctx.recipients)?;
    ctx.remote.put(cancel, INDEX_KEY, ciphertext).await?;
    tracing::debug!(entries = merged.entries.len(), "uploaded merged index");

    let blob_policy = RetryPolicy::exponential(
        ctx.options.blob_attempts,
        ctx.options.blob_backoff,
        Duration::from_secs(2),
    );
    let mut report = SyncReport {
        entries: merged.entries.len(),
        ..SyncReport::default()
    };
    let mut failed = 0;

    for filename in merged.referenced() {
        ensure_active(cancel)?;
        let Some(hash) = hash_from_path(&filename) else {
            tracing::warn!(blob = %filename, "index references a malformed blob path");
            continue;
        };
        if ctx.store.blobs().exists(&hash)? {
            continue;
        }
        let hash = hash.as_str();
        match blob_policy
            .run(cancel, &filename, move || download_blob(cancel, ctx, hash))
            .await
        {
            Ok(()) => report.downloaded += 1,
            Err(HoardError::Canceled) => return Err(HoardError::Canceled),
            Err(e) => {
                if e.is_expected() {
                    tracing::debug!(blob = %filename, error = %e, "blob download failed");
                } else {
                    tracing::warn!(blob = %filename, error = %e, "blob download failed");
                }
                failed += 1;
            }
        }
    }

    for hash in ctx.store.blobs().hashes(cancel)? {
        ensure_active(cancel)?;
        let hash = hash.as_str();
        match blob_policy
            .run(cancel, hash, move || upload_blob(cancel, ctx, hash))
            .await
        {
            Ok(true) => report.uploaded += 1,
            Ok(false) => {}
            Err(HoardError::Canceled) => return Err(HoardError::Canceled),
            Err(e) => {
                if e.is_expected() {
                    tracing::debug!(blob = hash, error = %e, "blob upload failed");
                } else {
                    tracing::warn!(blob = hash, error = %e, "blob upload failed");
                }
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(HoardError::SyncPartial { failed });
    }
    Ok(report)
}

async fn download_blob(
    cancel: &CancellationToken,
    ctx: SyncContext<'_>,
    hash: &str,
) -> HoardResult<()> {
    let key = blob_path(hash)?;
    let data = ctx.remote.get(cancel, &key).await?;
    let actual = blob::hash(&data);
    if actual != hash {
        return Err(HoardError::Malformed(format!(
            "remote blob {key} has content hash {actual}"
        )));
    }
    ctx.store.blobs().put(cancel, &data)?;
    tracing::debug!(blob = %key, bytes = data.len(), "downloaded blob");
    Ok(())
}

/// Upload one local blob unless the remote already has it.
async fn upload_blob(
    cancel: &CancellationToken,
    ctx: SyncContext<'_>,
    hash: &str,
) -> HoardResult<bool> {
    let key = blob_path(hash)?;
    if ctx.remote.stat(cancel, &key).await?.is_some() {
        return Ok(false);
    }
    let data = ctx.store.blobs().get(cancel, hash)?;
    let bytes = data.len();
    ctx.remote.put(cancel, &key, data).await?;
    tracing::debug!(blob = %key, bytes, "uploaded blob");
    Ok(true)
}
