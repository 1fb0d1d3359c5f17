//! Revisioned index: entry name → ordered revisions → blob path.
//!
//! Persisted as `index.pb` with the previous snapshot kept in
//! `index.pb.back`. Every save follows the same barrier: write
//! `index.pb.tmp`, rename `index.pb` to `index.pb.back`, rename the temp
//! file to `index.pb`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hoard_core::fsutil;
use hoard_core::proto::index as pb;
use hoard_core::wire::{decode_preserving, encode_nested, encode_preserving, raw_fields, UnknownFields};
use hoard_core::{HoardError, HoardResult};
use prost::Message;

pub const INDEX_FILE: &str = "index.pb";
pub const INDEX_BACKUP_FILE: &str = "index.pb.back";
pub const INDEX_TMP_FILE: &str = "index.pb.tmp";

/// Field tags understood by this version, per message.
const STORE_FIELDS: &[u32] = &[1, 2];
const ENTRY_FIELDS: &[u32] = &[1, 2];
const REVISION_FIELDS: &[u32] = &[1, 2, 3, 4];
/// `Store.entries`, `Entry.revisions`
const ENTRIES_TAG: u32 = 2;
const REVISIONS_TAG: u32 = 2;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> i128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

/// One point-in-time version of an entry.
///
/// Ordering is by `created`, ties broken by `filename`, then the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    /// Nanoseconds since the Unix epoch
    pub created: i128,
    /// Blob path (`ab/cdef…`); empty for tombstones
    pub filename: String,
    pub message: String,
    pub tombstone: bool,
    unknown: UnknownFields,
}

impl Revision {
    /// Client-visible revision ID: `created` in decimal nanoseconds.
    pub fn id(&self) -> String {
        self.created.to_string()
    }

    pub fn created_at(&self) -> SystemTime {
        if self.created >= 0 {
            UNIX_EPOCH + Duration::from_nanos(self.created as u64)
        } else {
            UNIX_EPOCH - Duration::from_nanos(self.created.unsigned_abs() as u64)
        }
    }

    fn to_proto(&self) -> pb::Revision {
        pb::Revision {
            created: Some(prost_types::Timestamp {
                seconds: self.created.div_euclid(NANOS_PER_SEC) as i64,
                nanos: self.created.rem_euclid(NANOS_PER_SEC) as i32,
            }),
            message: self.message.clone(),
            filename: self.filename.clone(),
            tombstone: self.tombstone,
        }
    }

    /// Same version, ignoring fields this build does not know.
    fn same_version(&self, other: &Revision) -> bool {
        self.created == other.created
            && self.filename == other.filename
            && self.message == other.message
            && self.tombstone == other.tombstone
    }

    fn encode(&self) -> Vec<u8> {
        encode_preserving(&self.to_proto(), &self.unknown)
    }

    fn decode(buf: &[u8]) -> HoardResult<Self> {
        let (p, unknown): (pb::Revision, _) = decode_preserving(buf, REVISION_FIELDS)?;
        let created = p
            .created
            .map(|ts| i128::from(ts.seconds) * NANOS_PER_SEC + i128::from(ts.nanos))
            .unwrap_or(0);
        Ok(Self {
            created,
            filename: p.filename,
            message: p.message,
            tombstone: p.tombstone,
            unknown,
        })
    }
}

/// A named record with its revision history (ascending by `created`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub revisions: Vec<Revision>,
    unknown: UnknownFields,
}

impl Entry {
    pub fn new(name: impl Into<String>, revisions: Vec<Revision>) -> Self {
        Self {
            name: name.into(),
            revisions,
            unknown: UnknownFields::default(),
        }
    }

    pub fn latest(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    pub fn is_deleted(&self) -> bool {
        self.latest().is_none_or(|r| r.tombstone)
    }

    /// Next local timestamp: `now`, or 1ns past the latest revision.
    fn next_created(&self, now: i128) -> i128 {
        match self.latest() {
            Some(last) if last.created >= now => last.created + 1,
            _ => now,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = pb::Entry {
            name: self.name.clone(),
            revisions: Vec::new(),
        }
        .encode_to_vec();
        for rev in &self.revisions {
            encode_nested(REVISIONS_TAG, &rev.encode(), &mut out);
        }
        self.unknown.append_to(&mut out);
        out
    }

    fn decode(buf: &[u8], key: &str) -> HoardResult<Self> {
        let (e, unknown): (pb::Entry, _) = decode_preserving(buf, ENTRY_FIELDS)?;
        let mut revisions = raw_fields(buf)?
            .into_iter()
            .filter(|f| f.tag == REVISIONS_TAG)
            .map(|f| Revision::decode(f.value))
            .collect::<HoardResult<Vec<_>>>()?;
        revisions.sort();
        let name = if e.name.is_empty() { key.to_string() } else { e.name };
        Ok(Self {
            name,
            revisions,
            unknown,
        })
    }
}

/// Counters from [`Index::compact`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    pub entries_removed: usize,
    pub revisions_removed: usize,
}

/// The whole index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub entries: BTreeMap<String, Entry>,
    unknown: UnknownFields,
}

impl Index {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn get_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Append a revision pointing at `filename`.
    pub fn put_revision(
        &mut self,
        name: &str,
        filename: &str,
        message: &str,
        now: i128,
    ) -> Revision {
        self.append(name, filename, message, false, now)
    }

    /// Append a tombstone. Returns `None` (and changes nothing) when the
    /// entry is absent or already deleted.
    pub fn delete(&mut self, name: &str, message: &str, now: i128) -> Option<Revision> {
        if !self.exists(name) {
            return None;
        }
        Some(self.append(name, "", message, true, now))
    }

    fn append(
        &mut self,
        name: &str,
        filename: &str,
        message: &str,
        tombstone: bool,
        now: i128,
    ) -> Revision {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::new(name, Vec::with_capacity(1)));
        let rev = Revision {
            created: entry.next_created(now),
            filename: filename.to_string(),
            message: message.to_string(),
            tombstone,
            ..Revision::default()
        };
        entry.revisions.push(rev.clone());
        rev
    }

    /// Present and not tombstoned.
    pub fn exists(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| !e.is_deleted())
    }

    /// Live entry names starting with `prefix`, sorted.
    pub fn list<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(prefix))
            .filter(|(_, e)| !e.is_deleted())
            .map(|(name, _)| name.as_str())
    }

    pub fn revisions(&self, name: &str) -> Option<&[Revision]> {
        self.entries.get(name).map(|e| e.revisions.as_slice())
    }

    /// Union of two indexes. Commutative, associative and idempotent.
    ///
    /// Where both sides carry unknown fields for the same record, the
    /// greater encoding wins.
    pub fn merge(&self, other: &Index) -> Index {
        let mut entries = self.entries.clone();
        for (name, theirs) in &other.entries {
            let mine = entries
                .entry(name.clone())
                .or_insert_with(|| Entry::new(theirs.name.clone(), Vec::new()));
            if theirs.unknown > mine.unknown {
                mine.unknown = theirs.unknown.clone();
            }
            mine.revisions.extend(theirs.revisions.iter().cloned());
        }
        for entry in entries.values_mut() {
            // Sorted descending on ties so the kept copy has the greater unknowns
            entry.revisions.sort_by(|a, b| {
                a.same_version(b)
                    .then(|| b.unknown.cmp(&a.unknown))
                    .unwrap_or_else(|| a.cmp(b))
            });
            entry.revisions.dedup_by(|later, earlier| later.same_version(earlier));
        }

        let name = match (self.name.is_empty(), other.name.is_empty()) {
            (true, _) => other.name.clone(),
            (_, true) => self.name.clone(),
            _ => self.name.clone().min(other.name.clone()),
        };
        let unknown = self.unknown.clone().max(other.unknown.clone());

        Index {
            name,
            entries,
            unknown,
        }
    }

    /// Drop deleted entries older than `tombstone_ttl` and cap every other
    /// entry at its newest `max_revisions` revisions.
    pub fn compact(
        &mut self,
        now: i128,
        tombstone_ttl: Duration,
        max_revisions: usize,
    ) -> CompactStats {
        let ttl = tombstone_ttl.as_nanos() as i128;
        let mut stats = CompactStats::default();

        self.entries.retain(|name, entry| {
            let expired = entry.is_deleted()
                && entry
                    .latest()
                    .is_none_or(|latest| now.saturating_sub(latest.created) > ttl);
            if expired {
                tracing::debug!(entry = %name, "dropping expired tombstone");
                stats.entries_removed += 1;
                stats.revisions_removed += entry.revisions.len();
            }
            !expired
        });

        for entry in self.entries.values_mut() {
            entry.revisions.sort();
            if entry.revisions.len() > max_revisions.max(1) {
                let excess = entry.revisions.len() - max_revisions.max(1);
                entry.revisions.drain(..excess);
                stats.revisions_removed += excess;
            }
        }
        stats
    }

    /// Every blob path any revision points at.
    pub fn referenced(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flat_map(|e| e.revisions.iter())
            .filter(|r| !r.filename.is_empty())
            .map(|r| r.filename.clone())
            .collect()
    }

    /// Encode as `index.Store`, unknown fields included at every level.
    ///
    /// Map entries are written by hand so each nested `Entry` and
    /// `Revision` can carry its preserved fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = pb::Store {
            name: self.name.clone(),
            entries: BTreeMap::new(),
        }
        .encode_to_vec();
        for (key, entry) in &self.entries {
            let mut map_entry = Vec::new();
            prost::encoding::string::encode(1, key, &mut map_entry);
            encode_nested(2, &entry.encode(), &mut map_entry);
            encode_nested(ENTRIES_TAG, &map_entry, &mut out);
        }
        self.unknown.append_to(&mut out);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> HoardResult<Self> {
        let (store, unknown): (pb::Store, _) = decode_preserving(buf, STORE_FIELDS)?;
        let mut entries = BTreeMap::new();
        for field in raw_fields(buf)? {
            if field.tag != ENTRIES_TAG {
                continue;
            }
            let mut key = String::new();
            let mut body: &[u8] = &[];
            for part in raw_fields(field.value)? {
                match part.tag {
                    1 => {
                        key = String::from_utf8(part.value.to_vec()).map_err(|_| {
                            HoardError::Malformed("index entry key is not UTF-8".into())
                        })?
                    }
                    2 => body = part.value,
                    _ => {}
                }
            }
            let entry = Entry::decode(body, &key)?;
            entries.insert(key, entry);
        }
        Ok(Self {
            name: store.name,
            entries,
            unknown,
        })
    }

    /// Load from `dir`, recovering from an interrupted save.
    ///
    /// A leftover `index.pb.tmp` is discarded. If `index.pb` is missing but
    /// `index.pb.back` exists, the backup is restored.
    pub fn load(dir: &Path) -> HoardResult<Self> {
        let tmp = dir.join(INDEX_TMP_FILE);
        if tmp.exists() {
            tracing::warn!(path = %tmp.display(), "discarding incomplete index write");
            std::fs::remove_file(&tmp)?;
        }

        let path = dir.join(INDEX_FILE);
        if let Some(buf) = fsutil::read_optional(&path)? {
            return Self::from_bytes(&buf);
        }

        let backup = dir.join(INDEX_BACKUP_FILE);
        if let Some(buf) = fsutil::read_optional(&backup)? {
            tracing::warn!(path = %backup.display(), "index missing, restoring from backup");
            let index = Self::from_bytes(&buf)?;
            fsutil::write_atomic(&path, &buf)?;
            return Ok(index);
        }

        Ok(Self::new(index_name(dir)))
    }

    /// Persist to `dir` through the tmp → back → rename barrier.
    pub fn save(&self, dir: &Path) -> HoardResult<()> {
        let bytes = self.to_bytes();
        let tmp = dir.join(INDEX_TMP_FILE);
        let path = dir.join(INDEX_FILE);

        fsutil::write_private(&tmp, &bytes)?;
        match std::fs::rename(&path, dir.join(INDEX_BACKUP_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), entries = self.entries.len(), "saved index");
        Ok(())
    }
}

fn index_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Entry names are relative, slash-separated and free of `..`.
pub fn validate_name(name: &str) -> HoardResult<()> {
    if name.is_empty() || name.starts_with('/') || name.split('/').any(|c| c == "..") {
        return Err(HoardError::Malformed(format!("invalid entry name {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DAY: i128 = 86_400 * NANOS_PER_SEC;

    fn rev(created: i128, filename: &str, tombstone: bool) -> Revision {
        Revision {
            created,
            filename: filename.into(),
            tombstone,
            ..Revision::default()
        }
    }

    #[test]
    fn test_put_and_latest() {
        let mut idx = Index::new("test");
        idx.put_revision("foo", "aa/1", "v1", 10);
        idx.put_revision("foo", "bb/2", "v2", 20);
        let e = idx.get_entry("foo").unwrap();
        assert_eq!(e.revisions.len(), 2);
        assert_eq!(e.latest().unwrap().filename, "bb/2");
        assert!(idx.exists("foo"));
    }

    #[test]
    fn test_timestamps_strictly_increase_under_coarse_clock() {
        let mut idx = Index::new("test");
        let a = idx.put_revision("foo", "aa/1", "", 100);
        let b = idx.put_revision("foo", "aa/2", "", 100);
        let c = idx.put_revision("foo", "aa/3", "", 50);
        assert!(a.created < b.created && b.created < c.created);
    }

    #[test]
    fn test_delete_adds_tombstone_once() {
        let mut idx = Index::new("test");
        assert!(idx.delete("missing", "Deleted", 1).is_none());
        assert!(idx.get_entry("missing").is_none());

        idx.put_revision("k", "aa/1", "", 1);
        let tomb = idx.delete("k", "Deleted", 2).unwrap();
        assert!(tomb.tombstone);
        assert!(tomb.filename.is_empty());
        assert!(!idx.exists("k"));
        assert!(idx.delete("k", "Deleted", 3).is_none());
        assert_eq!(idx.revisions("k").unwrap().len(), 2);
    }

    #[test]
    fn test_list_prefix_skips_deleted() {
        let mut idx = Index::new("test");
        idx.put_revision("web/a", "aa/1", "", 1);
        idx.put_revision("web/b", "aa/2", "", 1);
        idx.put_revision("wf", "aa/3", "", 1);
        idx.put_revision("mail/x", "aa/4", "", 1);
        idx.delete("web/b", "", 2);

        assert_eq!(idx.list("web/").collect::<Vec<_>>(), vec!["web/a"]);
        assert_eq!(
            idx.list("").collect::<Vec<_>>(),
            vec!["mail/x", "web/a", "wf"]
        );
    }

    #[test]
    fn test_merge_later_tombstone_wins() {
        let mut a = Index::new("s");
        a.put_revision("k", "aa/1", "", 10);
        let mut b = a.clone();
        b.delete("k", "Deleted", 20);
        a.put_revision("k", "aa/2", "", 15);

        let merged = a.merge(&b);
        assert!(!merged.exists("k"));
        assert_eq!(merged.revisions("k").unwrap().len(), 3);
    }

    #[test]
    fn test_merge_ties_break_on_filename() {
        let mut a = Index::new("s");
        let mut b = Index::new("s");
        a.entries
            .insert("k".into(), Entry::new("k", vec![rev(5, "bb/2", false)]));
        b.entries
            .insert("k".into(), Entry::new("k", vec![rev(5, "aa/1", false)]));
        let ab = a.merge(&b);
        assert_eq!(ab, b.merge(&a));
        assert_eq!(ab.get_entry("k").unwrap().latest().unwrap().filename, "bb/2");
    }

    #[test]
    fn test_compact_drops_old_tombstones_and_caps_revisions() {
        let ttl = Duration::from_secs(365 * 86_400);
        let now = 1000 * DAY;
        let mut idx = Index::new("s");

        idx.put_revision("old", "aa/1", "", now - 500 * DAY);
        idx.delete("old", "", now - 400 * DAY);
        idx.put_revision("recent", "aa/2", "", now - 10 * DAY);
        idx.delete("recent", "", now - 5 * DAY);
        for i in 0..300 {
            idx.put_revision("busy", &format!("bb/{i}"), "", now - 1000 + i);
        }

        let stats = idx.compact(now, ttl, 256);
        assert!(idx.get_entry("old").is_none());
        assert!(idx.get_entry("recent").is_some());
        let busy = idx.get_entry("busy").unwrap();
        assert_eq!(busy.revisions.len(), 256);
        assert_eq!(busy.latest().unwrap().filename, "bb/299");
        assert_eq!(stats.entries_removed, 1);
        assert_eq!(stats.revisions_removed, 2 + 44);

        // idempotent
        let before = idx.clone();
        assert_eq!(idx.compact(now, ttl, 256), CompactStats::default());
        assert_eq!(idx, before);
    }

    #[test]
    fn test_referenced_covers_deleted_entry_history() {
        let mut idx = Index::new("s");
        idx.put_revision("a", "aa/1", "", 1);
        idx.delete("a", "", 2);
        idx.put_revision("b", "bb/2", "", 1);
        let refs: Vec<_> = idx.referenced().into_iter().collect();
        assert_eq!(refs, vec!["aa/1".to_string(), "bb/2".to_string()]);
    }

    #[test]
    fn test_bytes_roundtrip_with_negative_and_fractional_times() {
        let mut idx = Index::new("s");
        idx.put_revision("a", "aa/1", "m", -1_500_000_001);
        idx.put_revision("b", "bb/2", "", 1_700_000_000_123_456_789);
        let back = Index::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(back, idx);
    }

    /// `index.Store` with a field 9 inside a `Revision`, a field 8 inside an
    /// `Entry` and a field 7 at the top level.
    fn index_from_newer_writer() -> Vec<u8> {
        use prost::encoding::{encode_key, encode_varint, WireType};

        let mut revision = pb::Revision {
            created: Some(prost_types::Timestamp {
                seconds: 1,
                nanos: 0,
            }),
            message: "m".into(),
            filename: "aa/1".into(),
            tombstone: false,
        }
        .encode_to_vec();
        encode_key(9, WireType::Varint, &mut revision);
        encode_varint(7, &mut revision);

        let mut entry = pb::Entry {
            name: "k".into(),
            revisions: Vec::new(),
        }
        .encode_to_vec();
        encode_nested(2, &revision, &mut entry);
        encode_nested(8, b"new", &mut entry);

        let mut map_entry = Vec::new();
        prost::encoding::string::encode(1, &"k".to_string(), &mut map_entry);
        encode_nested(2, &entry, &mut map_entry);

        let mut store = pb::Store {
            name: "s".into(),
            entries: BTreeMap::new(),
        }
        .encode_to_vec();
        encode_nested(2, &map_entry, &mut store);
        encode_key(7, WireType::Varint, &mut store);
        encode_varint(1, &mut store);
        store
    }

    #[test]
    fn test_nested_unknown_fields_survive_roundtrip() {
        let encoded = index_from_newer_writer();
        let idx = Index::from_bytes(&encoded).unwrap();
        let revs = idx.revisions("k").unwrap();
        assert_eq!(revs.len(), 1);
        assert_eq!(revs[0].filename, "aa/1");
        assert_eq!(revs[0].created, NANOS_PER_SEC);
        assert_eq!(idx.to_bytes(), encoded);
    }

    #[test]
    fn test_nested_unknown_fields_survive_merge() {
        let idx = Index::from_bytes(&index_from_newer_writer()).unwrap();
        let mut older = Index::new("s");
        older.put_revision("k", "aa/1", "m", NANOS_PER_SEC);

        let ab = idx.merge(&older);
        let ba = older.merge(&idx);
        assert_eq!(ab, ba);
        assert_eq!(ab.revisions("k").unwrap().len(), 1);
        assert_eq!(ab.to_bytes(), index_from_newer_writer());
    }

    #[test]
    fn test_nested_unknown_fields_survive_local_write() {
        let mut idx = Index::from_bytes(&index_from_newer_writer()).unwrap();
        idx.put_revision("k", "bb/2", "v2", 2 * NANOS_PER_SEC);
        idx.put_revision("other", "cc/3", "", 3 * NANOS_PER_SEC);

        let back = Index::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(back, idx);
        let first = &back.revisions("k").unwrap()[0];
        assert!(!first.unknown.is_empty());
        assert!(!back.get_entry("k").unwrap().unknown.is_empty());
    }

    #[test]
    fn test_save_barrier_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = Index::new("s");
        idx.put_revision("a", "aa/1", "", 1);
        idx.save(dir.path()).unwrap();
        assert!(!dir.path().join(INDEX_BACKUP_FILE).exists());

        idx.put_revision("b", "bb/1", "", 2);
        idx.save(dir.path()).unwrap();

        let backup =
            Index::from_bytes(&std::fs::read(dir.path().join(INDEX_BACKUP_FILE)).unwrap())
                .unwrap();
        assert!(backup.exists("a") && !backup.exists("b"));
        assert_eq!(Index::load(dir.path()).unwrap(), idx);
        assert!(!dir.path().join(INDEX_TMP_FILE).exists());
    }

    #[test]
    fn test_load_recovers_from_crash_between_renames() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = Index::new("s");
        idx.put_revision("a", "aa/1", "", 1);
        idx.save(dir.path()).unwrap();
        idx.put_revision("b", "bb/1", "", 2);
        idx.save(dir.path()).unwrap();

        // Simulate a crash after step 4: index.pb renamed away, tmp written
        std::fs::rename(
            dir.path().join(INDEX_FILE),
            dir.path().join(INDEX_BACKUP_FILE),
        )
        .unwrap();
        std::fs::write(dir.path().join(INDEX_TMP_FILE), b"partial").unwrap();

        let loaded = Index::load(dir.path()).unwrap();
        assert!(loaded.exists("a") && loaded.exists("b"));
        assert!(dir.path().join(INDEX_FILE).exists());
        assert!(!dir.path().join(INDEX_TMP_FILE).exists());
    }

    #[test]
    fn test_load_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let idx = Index::load(dir.path()).unwrap();
        assert!(idx.entries.is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("web/github.com").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("/abs").is_err());
        assert!(validate_name("a/../b").is_err());
    }

    fn arb_index() -> impl Strategy<Value = Index> {
        let revision = (0i128..20, "[ab]{1,2}", any::<bool>()).prop_map(|(t, f, tomb)| {
            rev(t, if tomb { "" } else { f.as_str() }, tomb)
        });
        proptest::collection::btree_map(
            "[xyz]",
            proptest::collection::vec(revision, 1..4),
            0..4,
        )
        .prop_map(|m| {
            let mut idx = Index::new("s");
            for (name, mut revisions) in m {
                revisions.sort();
                revisions.dedup();
                idx.entries.insert(name.clone(), Entry::new(name, revisions));
            }
            idx
        })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(a in arb_index()) {
            prop_assert_eq!(a.merge(&a), a);
        }

        #[test]
        fn merge_is_commutative(a in arb_index(), b in arb_index()) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
        }

        #[test]
        fn merge_is_associative(a in arb_index(), b in arb_index(), c in arb_index()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn parse_inverts_serialize(a in arb_index()) {
            prop_assert_eq!(Index::from_bytes(&a.to_bytes()).unwrap(), a);
        }

        #[test]
        fn compact_is_idempotent(a in arb_index(), max in 1usize..4) {
            let mut once = a.clone();
            once.compact(30, Duration::from_nanos(5), max);
            let mut twice = once.clone();
            twice.compact(30, Duration::from_nanos(5), max);
            prop_assert_eq!(once, twice);
        }
    }
}
