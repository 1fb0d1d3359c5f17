//! Public and private keyrings persisted as protobuf files (mode 0600).
//!
//! A [`Pubring`] may be linked to a [`Secring`] so that public lookups fall
//! through to the public halves of locally held private keys. The link is a
//! weak reference; the private ring is expected to outlive the public one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use hoard_core::fsutil;
use hoard_core::proto::xc as pb;
use hoard_core::wire::{decode_preserving, encode_nested, raw_fields, UnknownFields};
use hoard_core::{HoardError, HoardResult};
use secrecy::SecretString;

use crate::kdf::KdfProfile;
use crate::keys::{Identity, PrivateKey, PublicKey};

/// Field tags of `Pubring` / `Secring` understood by this version.
const RING_FIELDS: &[u32] = &[1];
/// `Pubring.public_keys`, `Secring.private_keys`
const KEYS_TAG: u32 = 1;

/// Operations shared by both ring flavours.
pub trait KeyRing {
    /// Sorted fingerprints.
    fn list(&self) -> Vec<String>;

    fn contains(&self, fingerprint: &str) -> bool;

    /// Remove a key; returns whether it was present.
    fn remove(&self, fingerprint: &str) -> bool;

    /// Serialize one key for transfer to another ring.
    fn export(&self, fingerprint: &str, include_private: bool) -> HoardResult<Vec<u8>>;

    /// Add a key produced by [`KeyRing::export`]; returns its fingerprint.
    fn import(&self, bytes: &[u8]) -> HoardResult<String>;

    fn save(&self) -> HoardResult<()>;

    /// Fingerprints ending in `suffix` (short key IDs).
    fn find(&self, suffix: &str) -> Vec<String> {
        let suffix = suffix.to_ascii_lowercase();
        self.list()
            .into_iter()
            .filter(|fp| fp.ends_with(&suffix))
            .collect()
    }
}

struct RingState<K> {
    keys: BTreeMap<String, K>,
    unknown: UnknownFields,
}

impl<K> Default for RingState<K> {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
            unknown: UnknownFields::default(),
        }
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn persist(path: Option<&Path>, bytes: &[u8]) -> HoardResult<()> {
    let path = path.ok_or_else(|| HoardError::Internal("keyring has no backing file".into()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fsutil::create_private_dir_all(parent)?;
        }
    }
    fsutil::write_atomic(path, bytes)?;
    tracing::debug!(path = %path.display(), "keyring saved");
    Ok(())
}

/// `Pubring` / `Secring` from already-encoded key records.
fn encode_ring(records: impl Iterator<Item = Vec<u8>>, unknown: &UnknownFields) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        encode_nested(KEYS_TAG, &record, &mut out);
    }
    unknown.append_to(&mut out);
    out
}

// ── Secring ──────────────────────────────────────────────────────────────

/// Private keyring.
pub struct Secring {
    path: Option<PathBuf>,
    state: RwLock<RingState<PrivateKey>>,
}

impl Secring {
    /// An empty ring without a backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(RingState::default()),
        }
    }

    /// Load from `path`; an absent file yields an empty ring bound to `path`.
    pub fn load(path: impl Into<PathBuf>) -> HoardResult<Self> {
        let path = path.into();
        let state = match fsutil::read_optional(&path)? {
            Some(buf) => {
                let (_, unknown): (pb::Secring, _) = decode_preserving(&buf, RING_FIELDS)?;
                let mut keys = BTreeMap::new();
                for field in raw_fields(&buf)?.iter().filter(|f| f.tag == KEYS_TAG) {
                    let key = PrivateKey::from_bytes(field.value)?;
                    keys.insert(key.fingerprint(), key);
                }
                RingState { keys, unknown }
            }
            None => RingState::default(),
        };
        tracing::debug!(path = %path.display(), keys = state.keys.len(), "loaded secring");
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set(&self, key: PrivateKey) {
        write_guard(&self.state).keys.insert(key.fingerprint(), key);
    }

    pub fn get(&self, fingerprint: &str) -> Option<PrivateKey> {
        read_guard(&self.state).keys.get(fingerprint).cloned()
    }

    /// Public half of a held private key.
    pub fn get_public(&self, fingerprint: &str) -> Option<PublicKey> {
        read_guard(&self.state)
            .keys
            .get(fingerprint)
            .map(|k| k.public.clone())
    }

    /// Generate a keypair, add it to the ring and return it.
    pub fn generate(
        &self,
        identity: Identity,
        passphrase: &SecretString,
        kdf: KdfProfile,
    ) -> HoardResult<PrivateKey> {
        let key = PrivateKey::generate(identity, passphrase, kdf)?;
        self.set(key.clone());
        tracing::info!(fingerprint = %key.fingerprint(), "added private key");
        Ok(key)
    }

    pub fn len(&self) -> usize {
        read_guard(&self.state).keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyRing for Secring {
    fn list(&self) -> Vec<String> {
        read_guard(&self.state).keys.keys().cloned().collect()
    }

    fn contains(&self, fingerprint: &str) -> bool {
        read_guard(&self.state).keys.contains_key(fingerprint)
    }

    fn remove(&self, fingerprint: &str) -> bool {
        write_guard(&self.state).keys.remove(fingerprint).is_some()
    }

    fn export(&self, fingerprint: &str, include_private: bool) -> HoardResult<Vec<u8>> {
        let state = read_guard(&self.state);
        let key = state
            .keys
            .get(fingerprint)
            .ok_or_else(|| HoardError::NotFound(format!("private key {fingerprint}")))?;
        if include_private {
            Ok(key.to_bytes())
        } else {
            Ok(key.public.to_bytes())
        }
    }

    fn import(&self, bytes: &[u8]) -> HoardResult<String> {
        let key = PrivateKey::from_bytes(bytes)?;
        let fp = key.fingerprint();
        self.set(key);
        tracing::info!(fingerprint = %fp, "imported private key");
        Ok(fp)
    }

    fn save(&self) -> HoardResult<()> {
        let bytes = {
            let state = read_guard(&self.state);
            encode_ring(state.keys.values().map(PrivateKey::to_bytes), &state.unknown)
        };
        persist(self.path(), &bytes)
    }
}

// ── Pubring ──────────────────────────────────────────────────────────────

/// Public keyring, optionally falling through to a [`Secring`].
pub struct Pubring {
    path: Option<PathBuf>,
    state: RwLock<RingState<PublicKey>>,
    secring: Option<Weak<Secring>>,
}

impl Pubring {
    pub fn in_memory(secring: Option<&Arc<Secring>>) -> Self {
        Self {
            path: None,
            state: RwLock::new(RingState::default()),
            secring: secring.map(Arc::downgrade),
        }
    }

    /// Load from `path`, linking `secring` for fall-through lookups.
    pub fn load(path: impl Into<PathBuf>, secring: Option<&Arc<Secring>>) -> HoardResult<Self> {
        let path = path.into();
        let state = match fsutil::read_optional(&path)? {
            Some(buf) => {
                let (_, unknown): (pb::Pubring, _) = decode_preserving(&buf, RING_FIELDS)?;
                let mut keys = BTreeMap::new();
                for field in raw_fields(&buf)?.iter().filter(|f| f.tag == KEYS_TAG) {
                    let key = PublicKey::from_bytes(field.value)?;
                    keys.insert(key.fingerprint(), key);
                }
                RingState { keys, unknown }
            }
            None => RingState::default(),
        };
        tracing::debug!(path = %path.display(), keys = state.keys.len(), "loaded pubring");
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            secring: secring.map(Arc::downgrade),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn linked(&self) -> Option<Arc<Secring>> {
        self.secring.as_ref().and_then(Weak::upgrade)
    }

    pub fn set(&self, key: PublicKey) {
        write_guard(&self.state).keys.insert(key.fingerprint(), key);
    }

    /// Own entry first, then the public half of a linked private key.
    pub fn get(&self, fingerprint: &str) -> Option<PublicKey> {
        if let Some(key) = read_guard(&self.state).keys.get(fingerprint) {
            return Some(key.clone());
        }
        self.linked()?.get_public(fingerprint)
    }
}

impl KeyRing for Pubring {
    fn list(&self) -> Vec<String> {
        let mut fps: Vec<String> = read_guard(&self.state).keys.keys().cloned().collect();
        if let Some(sec) = self.linked() {
            fps.extend(sec.list());
            fps.sort();
            fps.dedup();
        }
        fps
    }

    fn contains(&self, fingerprint: &str) -> bool {
        read_guard(&self.state).keys.contains_key(fingerprint)
            || self.linked().is_some_and(|sec| sec.contains(fingerprint))
    }

    /// Removes only this ring's own entry; linked private keys are untouched.
    fn remove(&self, fingerprint: &str) -> bool {
        write_guard(&self.state).keys.remove(fingerprint).is_some()
    }

    fn export(&self, fingerprint: &str, include_private: bool) -> HoardResult<Vec<u8>> {
        if include_private {
            if let Some(sec) = self.linked() {
                if sec.contains(fingerprint) {
                    return sec.export(fingerprint, true);
                }
            }
        }
        let key = self
            .get(fingerprint)
            .ok_or_else(|| HoardError::NotFound(format!("public key {fingerprint}")))?;
        Ok(key.to_bytes())
    }

    fn import(&self, bytes: &[u8]) -> HoardResult<String> {
        let key = PublicKey::from_bytes(bytes)?;
        let fp = key.fingerprint();
        tracing::info!(fingerprint = %fp, identity = %key.identity, "imported public key");
        self.set(key);
        Ok(fp)
    }

    fn save(&self) -> HoardResult<()> {
        let bytes = {
            let state = read_guard(&self.state);
            encode_ring(state.keys.values().map(PublicKey::to_bytes), &state.unknown)
        };
        persist(self.path(), &bytes)
    }
}
