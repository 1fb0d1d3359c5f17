//! Store API: revisioned get/set/delete over the index and blob store.
//!
//! Values are opaque bytes (ciphertext); encryption happens a layer up.
//! Mutations serialize on the index mutex and are persisted before return.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hoard_core::config::StoreConfig;
use hoard_core::{ensure_active, fsutil, HoardError, HoardResult};
use tokio_util::sync::CancellationToken;

use crate::blob::{blob_path, hash_from_path, BlobStore};
use crate::index::{now_nanos, validate_name, CompactStats, Index, Revision};

/// Default message of tombstone revisions.
pub const DELETE_MESSAGE: &str = "Deleted";

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub max_revisions: usize,
    pub tombstone_ttl: Duration,
    pub verify_on_read: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_revisions: 256,
            tombstone_ttl: Duration::from_secs(365 * 24 * 60 * 60),
            verify_on_read: false,
        }
    }
}

impl From<&StoreConfig> for StoreSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_revisions: config.max_revisions,
            tombstone_ttl: Duration::from_secs(config.tombstone_ttl_days * 24 * 60 * 60),
            verify_on_read: config.verify_on_read,
        }
    }
}

/// An on-disk store rooted at one directory.
pub struct Store {
    root: PathBuf,
    blobs: BlobStore,
    index: Mutex<Index>,
    settings: StoreSettings,
}

impl Store {
    /// Open (or create) the store at `root`.
    pub fn open(root: impl Into<PathBuf>, settings: StoreSettings) -> HoardResult<Self> {
        let root = root.into();
        fsutil::create_private_dir_all(&root)?;
        let index = Index::load(&root)?;
        tracing::debug!(
            root = %root.display(),
            entries = index.entries.len(),
            "opened store"
        );
        Ok(Self {
            blobs: BlobStore::new(&root, settings.verify_on_read),
            root,
            index: Mutex::new(index),
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub(crate) fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A copy of the current index.
    pub fn snapshot(&self) -> Index {
        self.index().clone()
    }

    /// Merge `other` into the local index and persist the result.
    ///
    /// Runs under the index mutex so concurrent local writes are kept.
    pub fn merge_index(&self, cancel: &CancellationToken, other: &Index) -> HoardResult<Index> {
        ensure_active(cancel)?;
        let mut index = self.index();
        let merged = index.merge(other);
        merged.save(&self.root)?;
        *index = merged.clone();
        tracing::debug!(entries = merged.entries.len(), "merged index");
        Ok(merged)
    }

    /// Latest value of `name`.
    pub fn get(&self, cancel: &CancellationToken, name: &str) -> HoardResult<Vec<u8>> {
        ensure_active(cancel)?;
        let filename = {
            let index = self.index();
            let latest = index
                .get_entry(name)
                .and_then(|e| e.latest())
                .filter(|r| !r.tombstone)
                .ok_or_else(|| HoardError::NotFound(name.to_string()))?;
            latest.filename.clone()
        };
        self.read_blob(cancel, &filename)
    }

    /// Value of `name` at revision `revision_id` (see [`Revision::id`]).
    pub fn get_revision(
        &self,
        cancel: &CancellationToken,
        name: &str,
        revision_id: &str,
    ) -> HoardResult<Vec<u8>> {
        ensure_active(cancel)?;
        let filename = {
            let index = self.index();
            let rev = index
                .revisions(name)
                .and_then(|revs| revs.iter().rev().find(|r| r.id() == revision_id))
                .ok_or_else(|| HoardError::NotFound(format!("{name}@{revision_id}")))?;
            if rev.tombstone {
                return Err(HoardError::NotFound(format!(
                    "{name}@{revision_id} (deleted)"
                )));
            }
            rev.filename.clone()
        };
        self.read_blob(cancel, &filename)
    }

    fn read_blob(&self, cancel: &CancellationToken, filename: &str) -> HoardResult<Vec<u8>> {
        let hash = hash_from_path(filename)
            .ok_or_else(|| HoardError::Malformed(format!("bad blob path {filename:?}")))?;
        self.blobs.get_verified(cancel, &hash)
    }

    /// Store `value` as a new revision of `name`; returns the revision ID.
    pub fn set(&self, cancel: &CancellationToken, name: &str, value: &[u8]) -> HoardResult<String> {
        self.set_with_message(cancel, name, value, None)
    }

    /// Like [`Store::set`] with a commit message
    /// (default `"Updated <blob path>"`).
    pub fn set_with_message(
        &self,
        cancel: &CancellationToken,
        name: &str,
        value: &[u8],
        message: Option<&str>,
    ) -> HoardResult<String> {
        validate_name(name)?;
        let hash = self.blobs.put(cancel, value)?;
        let filename = blob_path(&hash)?;
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Updated {filename}"));

        ensure_active(cancel)?;
        let mut index = self.index();
        let mut next = index.clone();
        let rev = next.put_revision(name, &filename, &message, now_nanos());
        next.save(&self.root)?;
        *index = next;

        tracing::info!(entry = name, revision = %rev.id(), blob = %filename, "set entry");
        Ok(rev.id())
    }

    /// Tombstone `name`. Returns `false` if it does not exist.
    pub fn delete(&self, cancel: &CancellationToken, name: &str) -> HoardResult<bool> {
        self.delete_with_message(cancel, name, None)
    }

    pub fn delete_with_message(
        &self,
        cancel: &CancellationToken,
        name: &str,
        message: Option<&str>,
    ) -> HoardResult<bool> {
        ensure_active(cancel)?;
        let mut index = self.index();
        let mut next = index.clone();
        let now = now_nanos();
        if next
            .delete(name, message.unwrap_or(DELETE_MESSAGE), now)
            .is_none()
        {
            tracing::debug!(entry = name, "not adding tombstone for missing entry");
            return Ok(false);
        }
        next.save(&self.root)?;
        *index = next;

        tracing::info!(entry = name, "deleted entry");
        Ok(true)
    }

    /// Live entry names under `prefix`, sorted.
    pub fn list(&self, cancel: &CancellationToken, prefix: &str) -> HoardResult<Vec<String>> {
        let index = self.index();
        let mut out = Vec::new();
        for name in index.list(prefix) {
            ensure_active(cancel)?;
            out.push(name.to_string());
        }
        Ok(out)
    }

    /// Full history of `name`, oldest first.
    pub fn revisions(&self, cancel: &CancellationToken, name: &str) -> HoardResult<Vec<Revision>> {
        ensure_active(cancel)?;
        self.index()
            .revisions(name)
            .map(<[Revision]>::to_vec)
            .ok_or_else(|| HoardError::NotFound(name.to_string()))
    }

    pub fn exists(&self, cancel: &CancellationToken, name: &str) -> HoardResult<bool> {
        ensure_active(cancel)?;
        Ok(self.index().exists(name))
    }

    /// Tombstone every live entry under `prefix`; returns how many.
    ///
    /// Applied to a copy and persisted once, so cancellation leaves the
    /// index untouched.
    pub fn prune(&self, cancel: &CancellationToken, prefix: &str) -> HoardResult<usize> {
        let mut index = self.index();
        let mut next = index.clone();
        let names: Vec<String> = index.list(prefix).map(str::to_string).collect();
        let now = now_nanos();

        for name in &names {
            ensure_active(cancel)?;
            next.delete(name, DELETE_MESSAGE, now);
        }
        if names.is_empty() {
            return Ok(0);
        }
        next.save(&self.root)?;
        *index = next;

        tracing::info!(prefix, removed = names.len(), "pruned entries");
        Ok(names.len())
    }

    /// Drop expired tombstones and cap revision histories, then persist.
    pub fn compact(&self, cancel: &CancellationToken) -> HoardResult<CompactStats> {
        ensure_active(cancel)?;
        let mut index = self.index();
        let mut next = index.clone();
        let stats = next.compact(
            now_nanos(),
            self.settings.tombstone_ttl,
            self.settings.max_revisions,
        );
        next.save(&self.root)?;
        *index = next;

        tracing::info!(
            entries_removed = stats.entries_removed,
            revisions_removed = stats.revisions_removed,
            "compacted index"
        );
        Ok(stats)
    }
}
