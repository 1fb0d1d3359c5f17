//! XC message encryption: box-sealed session keys, secretbox-sealed chunks.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hoard_core::proto::xc as pb;
use hoard_core::{AuthScope, HoardError, HoardResult};
use prost::Message;
use rand::RngCore;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::kdf::SymmetricKey;
use crate::keyring::{KeyRing, Pubring, Secring};
use crate::keys::{PrivateKey, PublicKey, UnlockedKey};
use crate::stream::{ChunkOpener, SealedChunks};
use crate::{KEY_SIZE, MESSAGE_VERSION, NONCE_SIZE, TAG_SIZE};

/// Upper bound on decompressed plaintext, guarding against gzip bombs.
const MAX_PLAINTEXT: u64 = 1 << 30;

/// The XC crypto backend.
pub struct Xc {
    pubring: Arc<Pubring>,
    secring: Arc<Secring>,
    agent: Arc<Agent>,
}

impl Xc {
    pub fn new(pubring: Arc<Pubring>, secring: Arc<Secring>, agent: Arc<Agent>) -> Self {
        Self {
            pubring,
            secring,
            agent,
        }
    }

    pub fn pubring(&self) -> &Arc<Pubring> {
        &self.pubring
    }

    pub fn secring(&self) -> &Arc<Secring> {
        &self.secring
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Encrypt `plaintext` for `recipients` plus the local signer.
    pub fn encrypt(
        &self,
        cancel: &CancellationToken,
        plaintext: &[u8],
        recipients: &[String],
    ) -> HoardResult<Vec<u8>> {
        let signer = self.signer()?;

        let (payload, compressed) = match compress(plaintext)? {
            Some(smaller) => (smaller, true),
            None => (plaintext.to_vec(), false),
        };

        let session_key = random_session_key();
        let header = self.encrypt_header(cancel, &signer, &session_key, recipients)?;

        let chunks = SealedChunks::new(payload.as_slice(), &session_key)
            .map(|body| body.map(|body| pb::Chunk { body }))
            .collect::<HoardResult<Vec<_>>>()?;

        let msg = pb::Message {
            version: MESSAGE_VERSION,
            header: Some(header),
            chunks,
            compressed,
        };
        tracing::debug!(
            sender = %msg.header.as_ref().map(|h| h.sender.as_str()).unwrap_or_default(),
            chunks = msg.chunks.len(),
            compressed,
            "encrypted message"
        );
        Ok(msg.encode_to_vec())
    }

    /// Decrypt a message addressed to one of the local private keys.
    pub fn decrypt(&self, cancel: &CancellationToken, ciphertext: &[u8]) -> HoardResult<Vec<u8>> {
        let msg = pb::Message::decode(ciphertext)?;
        if msg.version != MESSAGE_VERSION {
            return Err(HoardError::UnsupportedVersion(msg.version));
        }
        let header = msg
            .header
            .ok_or_else(|| HoardError::Malformed("message without header".into()))?;

        let session_key = self.decrypt_session_key(cancel, &header)?;

        let mut opener = ChunkOpener::new(&session_key);
        let mut plain = Vec::new();
        for chunk in &msg.chunks {
            plain.extend_from_slice(&opener.open_next(&chunk.body)?);
        }

        if msg.compressed {
            return decompress(&plain, MAX_PLAINTEXT);
        }
        Ok(plain)
    }

    /// Sorted recipient fingerprints of an envelope, without decrypting it.
    pub fn recipient_ids(ciphertext: &[u8]) -> HoardResult<Vec<String>> {
        let msg = pb::Message::decode(ciphertext)?;
        if msg.version != MESSAGE_VERSION {
            return Err(HoardError::UnsupportedVersion(msg.version));
        }
        let header = msg
            .header
            .ok_or_else(|| HoardError::Malformed("message without header".into()))?;
        Ok(header.recipients.into_keys().collect())
    }

    /// First private key of the secring, in fingerprint order.
    pub(crate) fn signer(&self) -> HoardResult<PrivateKey> {
        self.secring
            .list()
            .first()
            .and_then(|fp| self.secring.get(fp))
            .ok_or(HoardError::NoIdentity)
    }

    /// Seal `session_key` for every unique recipient (signer included).
    pub(crate) fn encrypt_header(
        &self,
        cancel: &CancellationToken,
        signer: &PrivateKey,
        session_key: &SymmetricKey,
        recipients: &[String],
    ) -> HoardResult<pb::Header> {
        let sender = signer.fingerprint();

        let mut fps: Vec<&str> = recipients.iter().map(String::as_str).collect();
        fps.push(sender.as_str());
        fps.sort_unstable();
        fps.dedup();

        // Resolve everything before prompting for the signer's passphrase
        let keys: Vec<PublicKey> = fps
            .iter()
            .map(|fp| {
                self.pubring
                    .get(fp)
                    .ok_or_else(|| HoardError::UnknownRecipient(fp.to_string()))
            })
            .collect::<HoardResult<_>>()?;

        let unlocked = self.unlock(cancel, signer)?;
        let secret = unlocked.box_key();

        let mut sealed = BTreeMap::new();
        for key in &keys {
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);

            let salsa = SalsaBox::new(&key.box_key(), &secret);
            let boxed = salsa
                .encrypt(GenericArray::from_slice(&nonce), session_key.as_bytes().as_slice())
                .map_err(|e| HoardError::Internal(format!("box seal failed: {e}")))?;

            let mut entry = Vec::with_capacity(NONCE_SIZE + boxed.len());
            entry.extend_from_slice(&nonce);
            entry.extend_from_slice(&boxed);
            sealed.insert(key.fingerprint(), entry);
        }

        Ok(pb::Header {
            sender,
            recipients: sealed,
        })
    }

    /// Recover the session key from the first header entry we hold a key for.
    pub(crate) fn decrypt_session_key(
        &self,
        cancel: &CancellationToken,
        header: &pb::Header,
    ) -> HoardResult<SymmetricKey> {
        let recipient = self
            .secring
            .list()
            .into_iter()
            .find(|fp| header.recipients.contains_key(fp))
            .and_then(|fp| self.secring.get(&fp))
            .ok_or(HoardError::NotForMe)?;

        let sender = self
            .pubring
            .get(&header.sender)
            .ok_or_else(|| HoardError::UnknownSender(header.sender.clone()))?;

        let unlocked = self.unlock(cancel, &recipient)?;

        let entry = header
            .recipients
            .get(&recipient.fingerprint())
            .ok_or(HoardError::NotForMe)?;
        if entry.len() < NONCE_SIZE + TAG_SIZE {
            return Err(HoardError::Malformed("recipient entry too short".into()));
        }
        let (nonce, boxed) = entry.split_at(NONCE_SIZE);

        let salsa = SalsaBox::new(&sender.box_key(), &unlocked.box_key());
        let mut opened = salsa
            .decrypt(GenericArray::from_slice(nonce), boxed)
            .map_err(|_| HoardError::Auth(AuthScope::SessionKey))?;

        let key: Result<[u8; KEY_SIZE], _> = opened.as_slice().try_into();
        zeroize::Zeroize::zeroize(&mut opened);
        key.map(SymmetricKey::from_bytes)
            .map_err(|_| HoardError::Malformed("session key length".into()))
    }

    /// Unlock `key` with the agent's passphrase; a wrong passphrase is
    /// evicted from the cache so the next attempt prompts again.
    fn unlock(&self, cancel: &CancellationToken, key: &PrivateKey) -> HoardResult<UnlockedKey> {
        let fp = key.fingerprint();
        let reason = format!("Unlock private key {fp} ({})", key.public.identity);
        let passphrase = self.agent.passphrase(cancel, &fp, &reason)?;
        match key.unlock(&passphrase) {
            Ok(unlocked) => Ok(unlocked),
            Err(e @ HoardError::Auth(AuthScope::PrivateKey)) => {
                tracing::warn!(fingerprint = %fp, "wrong passphrase");
                self.agent.remove(&fp);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn random_session_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = SymmetricKey::from_bytes(bytes);
    zeroize::Zeroize::zeroize(&mut bytes);
    key
}

/// Gzip `data`; `None` unless the result is strictly smaller.
fn compress(data: &[u8]) -> HoardResult<Option<Vec<u8>>> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    let out = enc.finish()?;
    Ok((out.len() < data.len()).then_some(out))
}

/// Gunzip `data`, refusing output beyond `limit` bytes.
fn decompress(data: &[u8], limit: u64) -> HoardResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| HoardError::Malformed(format!("gzip: {e}")))?;
    if out.len() as u64 > limit {
        return Err(HoardError::Malformed(format!(
            "decompressed payload exceeds {limit} bytes"
        )));
    }
    Ok(out)
}
