//! Key derivation: Argon2id passphrase → key-encryption key

use argon2::{Algorithm, Argon2, Params, Version};
use hoard_core::config::KdfChoice;
use hoard_core::{HoardError, HoardResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost profile, persisted as `PrivateKey.kdf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfProfile {
    /// t=4, m=256 MiB, p=4
    #[default]
    Standard,
    /// t=1, m=8 MiB, p=1
    Light,
}

impl KdfProfile {
    pub fn id(self) -> u32 {
        match self {
            KdfProfile::Standard => 0,
            KdfProfile::Light => 1,
        }
    }

    pub fn from_id(id: u32) -> HoardResult<Self> {
        match id {
            0 => Ok(KdfProfile::Standard),
            1 => Ok(KdfProfile::Light),
            other => Err(HoardError::Malformed(format!("unknown kdf profile {other}"))),
        }
    }

    /// (memory KiB, iterations, lanes)
    fn costs(self) -> (u32, u32, u32) {
        match self {
            KdfProfile::Standard => (256 * 1024, 4, 4),
            KdfProfile::Light => (8 * 1024, 1, 1),
        }
    }
}

impl From<KdfChoice> for KdfProfile {
    fn from(choice: KdfChoice) -> Self {
        match choice {
            KdfChoice::Argon2id => KdfProfile::Standard,
            KdfChoice::Argon2idLight => KdfProfile::Light,
        }
    }
}

/// Derive a 256-bit key from a passphrase and a 16-byte salt using Argon2id.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    profile: KdfProfile,
) -> HoardResult<SymmetricKey> {
    let (mem_kib, time, lanes) = profile.costs();
    let params = Params::new(mem_kib, time, lanes, Some(KEY_SIZE))
        .map_err(|e| HoardError::Internal(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| HoardError::Internal(format!("Argon2id KDF failed: {e}")))?;

    Ok(SymmetricKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; 16];

        let key1 = derive_key(&passphrase, &salt, KdfProfile::Light).unwrap();
        let key2 = derive_key(&passphrase, &salt, KdfProfile::Light).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];
        let key1 = derive_key(&SecretString::from("passphrase-a"), &salt, KdfProfile::Light).unwrap();
        let key2 = derive_key(&SecretString::from("passphrase-b"), &salt, KdfProfile::Light).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");
        let key1 = derive_key(&passphrase, &[1u8; 16], KdfProfile::Light).unwrap();
        let key2 = derive_key(&passphrase, &[2u8; 16], KdfProfile::Light).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_profile_ids_roundtrip() {
        for p in [KdfProfile::Standard, KdfProfile::Light] {
            assert_eq!(KdfProfile::from_id(p.id()).unwrap(), p);
        }
        assert!(matches!(KdfProfile::from_id(9), Err(HoardError::Malformed(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SymmetricKey::from_bytes([0xAB; 32]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }
}
