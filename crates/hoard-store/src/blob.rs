//! Content-addressed blob files: `<root>/<h[0:2]>/<h[2:]>`, h = hex(SHA-256).

use std::path::{Path, PathBuf};

use hoard_core::{ensure_active, fsutil, HoardError, HoardResult};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Length of a hex SHA-256 digest.
pub const HASH_LEN: usize = 64;

/// Hex SHA-256 of `data`.
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn is_hash(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Relative blob path for a hash (`ab/cdef…`).
pub fn blob_path(hash: &str) -> HoardResult<String> {
    if !is_hash(hash) {
        return Err(HoardError::Malformed(format!("invalid blob hash {hash:?}")));
    }
    Ok(format!("{}/{}", &hash[..2], &hash[2..]))
}

/// Inverse of [`blob_path`]; `None` for anything that is not a blob path.
pub fn hash_from_path(rel: &str) -> Option<String> {
    let (shard, rest) = rel.split_once('/')?;
    let hash = format!("{shard}{rest}");
    (shard.len() == 2 && is_hash(&hash)).then_some(hash)
}

/// Immutable, idempotent file store keyed by content hash.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    verify_on_read: bool,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, verify_on_read: bool) -> Self {
        Self {
            root: root.into(),
            verify_on_read,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a blob.
    pub fn path_of(&self, hash: &str) -> HoardResult<PathBuf> {
        Ok(self.root.join(blob_path(hash)?))
    }

    /// Store `data`, returning its hash. Existing identical blobs are not rewritten.
    pub fn put(&self, cancel: &CancellationToken, data: &[u8]) -> HoardResult<String> {
        ensure_active(cancel)?;
        let hash = hash(data);
        let path = self.path_of(&hash)?;

        if let Some(existing) = fsutil::read_optional(&path)? {
            if existing == data {
                tracing::debug!(hash = %hash, "blob already present");
                return Ok(hash);
            }
            tracing::warn!(hash = %hash, "replacing corrupt blob");
        }

        if let Some(shard) = path.parent() {
            fsutil::create_private_dir_all(shard)?;
        }
        fsutil::write_atomic(&path, data)?;
        tracing::debug!(hash = %hash, bytes = data.len(), "wrote blob");
        Ok(hash)
    }

    /// Read a blob; with `verify_on_read` the content hash is checked too.
    pub fn get(&self, cancel: &CancellationToken, hash: &str) -> HoardResult<Vec<u8>> {
        ensure_active(cancel)?;
        let path = self.path_of(hash)?;
        let data = fsutil::read_optional(&path)?
            .ok_or_else(|| HoardError::NotFound(format!("blob {hash}")))?;
        if self.verify_on_read {
            verify(hash, &data)?;
        }
        Ok(data)
    }

    /// Read a blob and always check its content hash.
    pub fn get_verified(&self, cancel: &CancellationToken, hash: &str) -> HoardResult<Vec<u8>> {
        let data = self.get(cancel, hash)?;
        if !self.verify_on_read {
            verify(hash, &data)?;
        }
        Ok(data)
    }

    pub fn exists(&self, hash: &str) -> HoardResult<bool> {
        Ok(self.path_of(hash)?.is_file())
    }

    /// Delete a blob; returns whether it existed.
    pub fn remove(&self, hash: &str) -> HoardResult<bool> {
        match std::fs::remove_file(self.path_of(hash)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Visit every well-formed blob as `(hash, absolute path)`, in hash order.
    pub fn walk<F>(&self, cancel: &CancellationToken, mut visit: F) -> HoardResult<()>
    where
        F: FnMut(&str, &Path) -> HoardResult<()>,
    {
        for shard in sorted_entries(&self.root)? {
            ensure_active(cancel)?;
            let shard_name = shard.file_name().to_string_lossy().into_owned();
            if shard_name.len() != 2 || !shard.file_type()?.is_dir() {
                continue;
            }
            for file in sorted_entries(&shard.path())? {
                if !file.file_type()?.is_file() {
                    continue;
                }
                let rel = format!("{shard_name}/{}", file.file_name().to_string_lossy());
                if let Some(hash) = hash_from_path(&rel) {
                    visit(&hash, &file.path())?;
                }
            }
        }
        Ok(())
    }

    /// All well-formed blob hashes.
    pub fn hashes(&self, cancel: &CancellationToken) -> HoardResult<Vec<String>> {
        let mut out = Vec::new();
        self.walk(cancel, |hash, _| {
            out.push(hash.to_string());
            Ok(())
        })?;
        Ok(out)
    }
}

fn verify(expected: &str, data: &[u8]) -> HoardResult<()> {
    let actual = hash(data);
    if actual != expected {
        return Err(HoardError::Malformed(format!(
            "blob {expected} has content hash {actual}"
        )));
    }
    Ok(())
}

/// Directory entries sorted by name; a missing directory is empty.
pub(crate) fn sorted_entries(dir: &Path) -> HoardResult<Vec<std::fs::DirEntry>> {
    let iter = match std::fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = iter.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path(), false);
        (dir, blobs)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, blobs) = store();
        let cancel = CancellationToken::new();
        let h = blobs.put(&cancel, b"ciphertext").unwrap();
        assert_eq!(h, hash(b"ciphertext"));
        assert_eq!(blobs.get(&cancel, &h).unwrap(), b"ciphertext");
        assert!(blobs.exists(&h).unwrap());
    }

    #[test]
    fn test_layout_splits_first_two_chars() {
        let (dir, blobs) = store();
        let h = blobs.put(&CancellationToken::new(), b"x").unwrap();
        assert!(dir.path().join(&h[..2]).join(&h[2..]).is_file());
        assert_eq!(blob_path(&h).unwrap(), format!("{}/{}", &h[..2], &h[2..]));
        assert_eq!(hash_from_path(&blob_path(&h).unwrap()).unwrap(), h);
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, blobs) = store();
        let cancel = CancellationToken::new();
        let h1 = blobs.put(&cancel, b"same").unwrap();
        let mtime = std::fs::metadata(blobs.path_of(&h1).unwrap())
            .unwrap()
            .modified()
            .unwrap();
        let h2 = blobs.put(&cancel, b"same").unwrap();
        let mtime2 = std::fs::metadata(blobs.path_of(&h2).unwrap())
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(h1, h2);
        assert_eq!(mtime, mtime2);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, blobs) = store();
        let err = blobs
            .get(&CancellationToken::new(), &hash(b"absent"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_hash_rejected() {
        let (_dir, blobs) = store();
        assert!(matches!(
            blobs.get(&CancellationToken::new(), "../../etc/passwd"),
            Err(HoardError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path(), true);
        let cancel = CancellationToken::new();
        let h = blobs.put(&cancel, b"original").unwrap();
        std::fs::write(blobs.path_of(&h).unwrap(), b"tampered").unwrap();
        assert!(matches!(
            blobs.get(&cancel, &h),
            Err(HoardError::Malformed(_))
        ));
    }

    #[test]
    fn test_remove_and_walk() {
        let (dir, blobs) = store();
        let cancel = CancellationToken::new();
        let a = blobs.put(&cancel, b"a").unwrap();
        let b = blobs.put(&cancel, b"b").unwrap();
        // noise that walk must ignore
        std::fs::write(dir.path().join("index.pb"), b"idx").unwrap();

        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(blobs.hashes(&cancel).unwrap(), expected);

        assert!(blobs.remove(&a).unwrap());
        assert!(!blobs.remove(&a).unwrap());
        assert_eq!(blobs.hashes(&cancel).unwrap(), vec![b]);
    }

    #[test]
    fn test_put_honors_cancellation() {
        let (_dir, blobs) = store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            blobs.put(&cancel, b"x"),
            Err(HoardError::Canceled)
        ));
    }

    proptest! {
        #[test]
        fn get_put_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let (_dir, blobs) = store();
            let cancel = CancellationToken::new();
            let h = blobs.put(&cancel, &data).unwrap();
            let back = blobs.get(&cancel, &h).unwrap();
            prop_assert_eq!(hash(&back), h);
            prop_assert_eq!(back, data);
        }
    }
}
