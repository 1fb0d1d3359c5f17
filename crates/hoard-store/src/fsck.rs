//! Store repair: re-home misplaced blobs, remove orphans, tighten modes.

use std::collections::BTreeSet;
use std::path::Path;

use hoard_core::config::{PUBRING_FILE, SECRING_FILE};
use hoard_core::fsutil::{self, DIR_MODE, FILE_MODE};
use hoard_core::{ensure_active, HoardResult};
use tokio_util::sync::CancellationToken;

use crate::blob::{self, blob_path, sorted_entries};
use crate::index::{INDEX_BACKUP_FILE, INDEX_FILE, INDEX_TMP_FILE};
use crate::store::Store;

/// Root-level files that are not blobs.
const ROOT_FILES: &[&str] = &[
    INDEX_FILE,
    INDEX_BACKUP_FILE,
    INDEX_TMP_FILE,
    PUBRING_FILE,
    SECRING_FILE,
];

/// What a fsck pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub entries_compacted: usize,
    pub renamed: usize,
    pub orphans_removed: usize,
    pub permissions_fixed: usize,
    pub dirs_pruned: usize,
    pub unknown_dirs_skipped: usize,
}

impl FsckReport {
    /// True when the pass found nothing to repair.
    pub fn is_clean(&self) -> bool {
        self.entries_compacted == 0
            && self.renamed == 0
            && self.orphans_removed == 0
            && self.permissions_fixed == 0
            && self.dirs_pruned == 0
    }
}

impl Store {
    /// Compact, then walk the blob tree and repair it against the index.
    ///
    /// Every step is a single rename, unlink or chmod, so an interrupted
    /// run leaves a consistent store.
    pub fn fsck(&self, cancel: &CancellationToken) -> HoardResult<FsckReport> {
        let stats = self.compact(cancel)?;
        let mut report = FsckReport {
            entries_compacted: stats.entries_removed,
            ..FsckReport::default()
        };

        // Hold the index for the whole walk so no Set lands a blob we
        // would classify as an orphan.
        let index = self.index();
        let referenced = index.referenced();
        let root = self.root();

        if narrow(root, DIR_MODE)? {
            report.permissions_fixed += 1;
        }

        for top in sorted_entries(root)? {
            ensure_active(cancel)?;
            let name = top.file_name().to_string_lossy().into_owned();
            let path = top.path();
            let file_type = top.file_type()?;

            if file_type.is_file() {
                if ROOT_FILES.contains(&name.as_str()) {
                    if narrow(&path, FILE_MODE)? {
                        report.permissions_fixed += 1;
                    }
                } else {
                    tracing::warn!(path = %path.display(), "skipping unknown file in store root");
                }
                continue;
            }
            if !file_type.is_dir() {
                continue;
            }
            if !is_shard(&name) {
                tracing::warn!(path = %path.display(), "skipping unknown directory");
                report.unknown_dirs_skipped += 1;
                continue;
            }

            self.check_shard(cancel, &path, &referenced, &mut report)?;
        }
        drop(index);

        tracing::info!(
            renamed = report.renamed,
            orphans_removed = report.orphans_removed,
            permissions_fixed = report.permissions_fixed,
            dirs_pruned = report.dirs_pruned,
            "fsck finished"
        );
        Ok(report)
    }

    fn check_shard(
        &self,
        cancel: &CancellationToken,
        shard: &Path,
        referenced: &BTreeSet<String>,
        report: &mut FsckReport,
    ) -> HoardResult<()> {
        let root = self.root();

        for file in sorted_entries(shard)? {
            ensure_active(cancel)?;
            let path = file.path();
            if !file.file_type()?.is_file() {
                tracing::warn!(path = %path.display(), "skipping nested directory in shard");
                continue;
            }

            let data = std::fs::read(&path)?;
            let rel = blob_path(&blob::hash(&data))?;
            let target = root.join(&rel);

            if target != path {
                if target.exists() {
                    tracing::warn!(path = %path.display(), blob = %rel, "removing duplicate of existing blob");
                    std::fs::remove_file(&path)?;
                    report.orphans_removed += 1;
                    continue;
                }
                tracing::warn!(from = %path.display(), blob = %rel, "renaming misplaced blob");
                if let Some(parent) = target.parent() {
                    fsutil::create_private_dir_all(parent)?;
                }
                std::fs::rename(&path, &target)?;
                report.renamed += 1;
            }

            if !referenced.contains(&rel) {
                tracing::warn!(blob = %rel, "removing orphan blob");
                std::fs::remove_file(&target)?;
                report.orphans_removed += 1;
                continue;
            }
            if narrow(&target, FILE_MODE)? {
                report.permissions_fixed += 1;
            }
        }

        // Renames may have filled other shards; only this one can have emptied.
        if sorted_entries(shard)?.is_empty() {
            std::fs::remove_dir(shard)?;
            report.dirs_pruned += 1;
        } else if narrow(shard, DIR_MODE)? {
            report.permissions_fixed += 1;
        }
        Ok(())
    }
}

fn is_shard(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn narrow(path: &Path, mode: u32) -> HoardResult<bool> {
    let changed = fsutil::narrow_mode(path, mode)?;
    if changed {
        tracing::warn!(path = %path.display(), mode = %format_args!("{mode:o}"), "narrowed permissions");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSettings;

    fn open() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), StoreSettings::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_clean_store_is_untouched() {
        let (_dir, store) = open();
        let cancel = CancellationToken::new();
        store.set(&cancel, "a", b"alpha").unwrap();
        store.set(&cancel, "b", b"beta").unwrap();

        let report = store.fsck(&cancel).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(store.get(&cancel, "a").unwrap(), b"alpha");
        assert_eq!(store.get(&cancel, "b").unwrap(), b"beta");
    }

    #[test]
    fn test_misplaced_blob_is_renamed() {
        let (dir, store) = open();
        let cancel = CancellationToken::new();
        store.set(&cancel, "a", b"alpha").unwrap();

        let rel = blob_path(&blob::hash(b"alpha")).unwrap();
        let correct = dir.path().join(&rel);
        let wrong = dir.path().join("00").join("misplaced");
        std::fs::create_dir_all(wrong.parent().unwrap()).unwrap();
        std::fs::rename(&correct, &wrong).unwrap();

        let report = store.fsck(&cancel).unwrap();
        assert_eq!(report.renamed, 1);
        assert!(correct.is_file());
        assert!(!wrong.exists());
        assert_eq!(store.get(&cancel, "a").unwrap(), b"alpha");
    }

    #[test]
    fn test_duplicate_copy_is_removed() {
        let (dir, store) = open();
        let cancel = CancellationToken::new();
        store.set(&cancel, "a", b"alpha").unwrap();

        let dup = dir.path().join("ff").join("copy");
        std::fs::create_dir_all(dup.parent().unwrap()).unwrap();
        std::fs::write(&dup, b"alpha").unwrap();

        let report = store.fsck(&cancel).unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.dirs_pruned, 1);
        assert!(!dup.exists());
        assert_eq!(store.get(&cancel, "a").unwrap(), b"alpha");
    }

    #[test]
    fn test_unknown_top_level_dir_is_skipped() {
        let (dir, store) = open();
        let cancel = CancellationToken::new();
        let other = dir.path().join("notes");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("todo"), b"keep me").unwrap();

        let report = store.fsck(&cancel).unwrap();
        assert_eq!(report.unknown_dirs_skipped, 1);
        assert!(other.join("todo").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_narrowed() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = open();
        let cancel = CancellationToken::new();
        store.set(&cancel, "a", b"alpha").unwrap();
        let blob = dir.path().join(blob_path(&blob::hash(b"alpha")).unwrap());
        std::fs::set_permissions(&blob, std::fs::Permissions::from_mode(0o644)).unwrap();

        let report = store.fsck(&cancel).unwrap();
        assert!(report.permissions_fixed >= 1);
        let mode = std::fs::metadata(&blob).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_canceled_fsck() {
        let (_dir, store) = open();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.fsck(&cancel),
            Err(hoard_core::HoardError::Canceled)
        ));
    }
}
