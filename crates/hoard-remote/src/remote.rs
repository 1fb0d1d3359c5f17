//! Timed object-store calls under a key prefix.
//!
//! Every call is bounded by the per-call timeout and aborts early when the
//! caller's cancellation token fires. OpenDAL errors map onto
//! [`HoardError::NotFound`] or [`HoardError::Remote`].

use std::future::Future;
use std::time::Duration;

use hoard_core::config::RemoteConfig;
use hoard_core::{HoardError, HoardResult};
use opendal::Operator;
use tokio_util::sync::CancellationToken;

/// Key of the encrypted remote index.
pub const INDEX_KEY: &str = "index";
/// Key of the advisory sync lock.
pub const LOCK_KEY: &str = "index.lock";

/// Map an OpenDAL error for `key` onto the error taxonomy.
pub fn map_opendal_error(key: &str, err: opendal::Error) -> HoardError {
    match err.kind() {
        opendal::ErrorKind::NotFound => HoardError::NotFound(key.to_string()),
        _ => HoardError::Remote(format!("{key}: {err}")),
    }
}

/// A bucket (or in-memory store) seen through a key prefix.
#[derive(Clone, Debug)]
pub struct RemoteStore {
    op: Operator,
    prefix: String,
    timeout: Duration,
}

impl RemoteStore {
    pub fn new(op: Operator, prefix: &str, timeout: Duration) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            op,
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
            timeout,
        }
    }

    pub fn from_config(op: Operator, remote: &RemoteConfig) -> Self {
        Self::new(op, &remote.prefix, Duration::from_secs(remote.timeout_secs))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full object path of `key`.
    pub fn path(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    async fn call<T, F>(&self, cancel: &CancellationToken, key: &str, fut: F) -> HoardResult<T>
    where
        F: Future<Output = opendal::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HoardError::Canceled),
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(res) => res.map_err(|e| map_opendal_error(key, e)),
                Err(_) => Err(HoardError::Timeout(format!("remote call on {key}"))),
            },
        }
    }

    /// Read an object. Absent objects are `NotFound`.
    pub async fn get(&self, cancel: &CancellationToken, key: &str) -> HoardResult<Vec<u8>> {
        let path = self.path(key);
        let buf = self.call(cancel, key, self.op.read(&path)).await?;
        tracing::debug!(key, bytes = buf.len(), "remote get");
        Ok(buf.to_vec())
    }

    /// Like [`RemoteStore::get`] but absent objects are `None`.
    pub async fn get_optional(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> HoardResult<Option<Vec<u8>>> {
        match self.get(cancel, key).await {
            Ok(data) => Ok(Some(data)),
            Err(HoardError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, cancel: &CancellationToken, key: &str, data: Vec<u8>) -> HoardResult<()> {
        let path = self.path(key);
        let bytes = data.len();
        self.call(cancel, key, self.op.write(&path, data)).await?;
        tracing::debug!(key, bytes, "remote put");
        Ok(())
    }

    /// Size of an object, or `None` if it does not exist.
    pub async fn stat(&self, cancel: &CancellationToken, key: &str) -> HoardResult<Option<u64>> {
        let path = self.path(key);
        match self.call(cancel, key, self.op.stat(&path)).await {
            Ok(meta) => Ok(Some(meta.content_length())),
            Err(HoardError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object; deleting an absent object succeeds.
    pub async fn delete(&self, cancel: &CancellationToken, key: &str) -> HoardResult<()> {
        let path = self.path(key);
        match self.call(cancel, key, self.op.delete(&path)).await {
            Ok(()) | Err(HoardError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Verify the backend answers a listing of the prefix root.
    pub async fn check_health(&self, cancel: &CancellationToken) -> HoardResult<()> {
        let root = if self.prefix.is_empty() {
            "/".to_string()
        } else {
            self.prefix.clone()
        };
        match self.call(cancel, &root, self.op.list(&root)).await {
            Ok(_) | Err(HoardError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Non-failing form of [`RemoteStore::check_health`].
    pub async fn is_healthy(&self) -> bool {
        self.check_health(&CancellationToken::new()).await.is_ok()
    }
}
