//! Curve25519 keypairs with passphrase-locked private halves.

use std::time::{SystemTime, UNIX_EPOCH};

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use hoard_core::proto::xc as pb;
use hoard_core::wire::{decode_preserving, encode_nested, encode_preserving, raw_fields, UnknownFields};
use hoard_core::{AuthScope, HoardError, HoardResult};
use prost::Message;
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroize;

use crate::fingerprint::fingerprint;
use crate::kdf::{derive_key, KdfProfile};
use crate::{ALGO_NACL_CURVE25519, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

const PUBLIC_KEY_FIELDS: &[u32] = &[1, 2, 3, 4, 5];
const PRIVATE_KEY_FIELDS: &[u32] = &[1, 2, 3, 4, 5];
/// `PrivateKey.public`
const PUBLIC_TAG: u32 = 1;

/// Owner metadata attached to a keypair. Not part of the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub comment: Option<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            comment: None,
        }
    }

    fn to_proto(&self) -> pb::Identity {
        pb::Identity {
            name: self.name.clone(),
            email: self.email.clone(),
            comment: self.comment.clone().unwrap_or_default(),
        }
    }

    fn from_proto(p: pb::Identity) -> Self {
        Self {
            name: p.name,
            email: p.email,
            comment: (!p.comment.is_empty()).then_some(p.comment),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(comment) = &self.comment {
            write!(f, " ({comment})")?;
        }
        write!(f, " <{}>", self.email)
    }
}

/// Public half of a keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Seconds since the Unix epoch (UTC)
    pub creation_time: u64,
    pub algo: u32,
    pub key: [u8; KEY_SIZE],
    pub identity: Identity,
    unknown: UnknownFields,
}

impl PublicKey {
    pub fn fingerprint(&self) -> String {
        fingerprint(self.algo, &self.key)
    }

    pub(crate) fn box_key(&self) -> crypto_box::PublicKey {
        crypto_box::PublicKey::from(self.key)
    }

    pub fn to_proto(&self) -> pb::PublicKey {
        pb::PublicKey {
            creation_time: self.creation_time,
            algo: self.algo,
            pubkey: self.key.to_vec(),
            identity: Some(self.identity.to_proto()),
            fingerprint: self.fingerprint(),
        }
    }

    /// Rejects unknown algorithms, short keys and stored fingerprints that
    /// do not match the key material.
    pub fn from_proto(p: pb::PublicKey) -> HoardResult<Self> {
        if p.algo != ALGO_NACL_CURVE25519 {
            return Err(HoardError::Malformed(format!(
                "unsupported key algorithm {}",
                p.algo
            )));
        }
        let key: [u8; KEY_SIZE] = p.pubkey.as_slice().try_into().map_err(|_| {
            HoardError::Malformed(format!("public key has {} bytes", p.pubkey.len()))
        })?;
        let pk = Self {
            creation_time: p.creation_time,
            algo: p.algo,
            key,
            identity: Identity::from_proto(p.identity.unwrap_or_default()),
            unknown: UnknownFields::default(),
        };
        if !p.fingerprint.is_empty() && p.fingerprint != pk.fingerprint() {
            return Err(HoardError::Malformed(format!(
                "fingerprint mismatch for key {}",
                p.fingerprint
            )));
        }
        Ok(pk)
    }

    /// Encoded record, with fields from newer writers kept.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_preserving(&self.to_proto(), &self.unknown)
    }

    pub fn from_bytes(buf: &[u8]) -> HoardResult<Self> {
        let (p, unknown): (pb::PublicKey, _) = decode_preserving(buf, PUBLIC_KEY_FIELDS)?;
        let mut pk = Self::from_proto(p)?;
        pk.unknown = unknown;
        Ok(pk)
    }
}

/// A decrypted Curve25519 secret key, scoped to one operation.
///
/// Zeroized on drop.
pub struct UnlockedKey {
    bytes: [u8; KEY_SIZE],
}

impl UnlockedKey {
    pub(crate) fn box_key(&self) -> crypto_box::SecretKey {
        crypto_box::SecretKey::from(self.bytes)
    }

    fn public(&self) -> [u8; KEY_SIZE] {
        *self.box_key().public_key().as_bytes()
    }
}

impl Drop for UnlockedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Private half of a keypair. The secret key is only ever held sealed;
/// [`PrivateKey::unlock`] hands out a separate [`UnlockedKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub public: PublicKey,
    kdf: KdfProfile,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
    sealed: Vec<u8>,
    unknown: UnknownFields,
}

impl PrivateKey {
    /// Generate a fresh keypair and lock it under `passphrase`.
    pub fn generate(
        identity: Identity,
        passphrase: &SecretString,
        kdf: KdfProfile,
    ) -> HoardResult<Self> {
        let mut secret = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        let unlocked = UnlockedKey { bytes: secret };
        secret.zeroize();

        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let public = PublicKey {
            creation_time,
            algo: ALGO_NACL_CURVE25519,
            key: unlocked.public(),
            identity,
            unknown: UnknownFields::default(),
        };
        let (salt, nonce, sealed) = seal(&unlocked, passphrase, kdf)?;

        tracing::debug!(fingerprint = %public.fingerprint(), "generated keypair");
        Ok(Self {
            public,
            kdf,
            salt,
            nonce,
            sealed,
            unknown: UnknownFields::default(),
        })
    }

    pub fn fingerprint(&self) -> String {
        self.public.fingerprint()
    }

    pub fn kdf(&self) -> KdfProfile {
        self.kdf
    }

    /// Open the sealed secret key.
    ///
    /// A truncated record is an I/O error; a MAC failure (wrong passphrase)
    /// is `Auth(PrivateKey)`.
    pub fn unlock(&self, passphrase: &SecretString) -> HoardResult<UnlockedKey> {
        if self.sealed.len() < KEY_SIZE + TAG_SIZE {
            return Err(HoardError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("sealed private key has {} bytes", self.sealed.len()),
            )));
        }

        let kek = derive_key(passphrase, &self.salt, self.kdf)?;
        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(kek.as_bytes()));
        let mut plain = cipher
            .decrypt(GenericArray::from_slice(&self.nonce), self.sealed.as_slice())
            .map_err(|_| HoardError::Auth(AuthScope::PrivateKey))?;

        let bytes: Result<[u8; KEY_SIZE], _> = plain.as_slice().try_into();
        plain.zeroize();
        let unlocked = UnlockedKey {
            bytes: bytes.map_err(|_| HoardError::Malformed("private key length".into()))?,
        };

        if unlocked.public() != self.public.key {
            return Err(HoardError::Malformed(format!(
                "private key does not match public key {}",
                self.fingerprint()
            )));
        }
        Ok(unlocked)
    }

    /// Re-lock under a new passphrase with a fresh salt and nonce.
    pub fn change_passphrase(
        &mut self,
        old: &SecretString,
        new: &SecretString,
    ) -> HoardResult<()> {
        let unlocked = self.unlock(old)?;
        let (salt, nonce, sealed) = seal(&unlocked, new, self.kdf)?;
        self.salt = salt;
        self.nonce = nonce;
        self.sealed = sealed;
        Ok(())
    }

    pub fn to_proto(&self) -> pb::PrivateKey {
        pb::PrivateKey {
            public: Some(self.public.to_proto()),
            salt: self.salt.to_vec(),
            nonce: self.nonce.to_vec(),
            sealed_private: self.sealed.clone(),
            kdf: self.kdf.id(),
        }
    }

    pub fn from_proto(p: pb::PrivateKey) -> HoardResult<Self> {
        let public = p
            .public
            .ok_or_else(|| HoardError::Malformed("private key without public half".into()))?;
        let salt = p
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| HoardError::Malformed(format!("salt has {} bytes", p.salt.len())))?;
        let nonce = p
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| HoardError::Malformed(format!("nonce has {} bytes", p.nonce.len())))?;
        Ok(Self {
            public: PublicKey::from_proto(public)?,
            kdf: KdfProfile::from_id(p.kdf)?,
            salt,
            nonce,
            sealed: p.sealed_private,
            unknown: UnknownFields::default(),
        })
    }

    /// Encoded record including the public half, with fields from newer
    /// writers kept at both levels.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = pb::PrivateKey {
            public: None,
            ..self.to_proto()
        }
        .encode_to_vec();
        encode_nested(PUBLIC_TAG, &self.public.to_bytes(), &mut out);
        self.unknown.append_to(&mut out);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> HoardResult<Self> {
        let (p, unknown): (pb::PrivateKey, _) = decode_preserving(buf, PRIVATE_KEY_FIELDS)?;
        let mut key = Self::from_proto(p)?;
        if let Some(public) = raw_fields(buf)?.iter().rfind(|f| f.tag == PUBLIC_TAG) {
            key.public = PublicKey::from_bytes(public.value)?;
        }
        key.unknown = unknown;
        Ok(key)
    }
}

type Sealed = ([u8; SALT_SIZE], [u8; NONCE_SIZE], Vec<u8>);

fn seal(key: &UnlockedKey, passphrase: &SecretString, kdf: KdfProfile) -> HoardResult<Sealed> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let kek = derive_key(passphrase, &salt, kdf)?;
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(kek.as_bytes()));
    let sealed = cipher
        .encrypt(GenericArray::from_slice(&nonce), key.bytes.as_slice())
        .map_err(|e| HoardError::Internal(format!("sealing private key: {e}")))?;
    Ok((salt, nonce, sealed))
}
