//! Chunk sealing and the streaming variants of [`Xc`].
//!
//! The streaming encoder writes the same protobuf `Message` a buffered
//! encrypt produces (fields in tag order: version, header, chunks), one
//! chunk at a time. Chunk nonces are sequential, so chunks are processed
//! strictly in order.

use std::io::{Read, Write};

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use hoard_core::proto::xc as pb;
use hoard_core::{ensure_active, AuthScope, HoardError, HoardResult};
use prost::encoding::{encode_key, encode_varint, WireType};
use prost::Message;
use tokio_util::sync::CancellationToken;

use crate::cipher::{random_session_key, Xc};
use crate::kdf::SymmetricKey;
use crate::{CHUNK_SIZE, MESSAGE_VERSION, NONCE_SIZE, TAG_SIZE};

/// Largest header accepted by the streaming decoder.
const MAX_HEADER_LEN: u64 = 1 << 20;

/// Largest encoded `Chunk` accepted by the streaming decoder.
const MAX_CHUNK_LEN: u64 = (CHUNK_SIZE + TAG_SIZE + 16) as u64;

const FIELD_VERSION: u32 = 1;
const FIELD_HEADER: u32 = 2;
const FIELD_CHUNK: u32 = 3;
const FIELD_COMPRESSED: u32 = 4;

/// Nonce for chunk `index`: big-endian index in the first 8 bytes, rest zero.
pub fn chunk_nonce(index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Lazily seals a plaintext reader into ciphertext chunks of at most
/// [`CHUNK_SIZE`] plaintext bytes each.
pub struct SealedChunks<R> {
    reader: R,
    cipher: XSalsa20Poly1305,
    index: u64,
    done: bool,
}

impl<R: Read> SealedChunks<R> {
    pub fn new(reader: R, key: &SymmetricKey) -> Self {
        Self {
            reader,
            cipher: XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes())),
            index: 0,
            done: false,
        }
    }

    /// Fill `buf` as far as the reader allows; returns the byte count.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for SealedChunks<R> {
    type Item = HoardResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = match self.fill(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if n < CHUNK_SIZE {
            self.done = true;
        }
        if n == 0 {
            return None;
        }

        let nonce = chunk_nonce(self.index);
        self.index += 1;
        let sealed = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), &buf[..n])
            .map_err(|e| HoardError::Internal(format!("secretbox seal failed: {e}")));
        Some(sealed)
    }
}

/// Opens chunks in sequence, tracking the expected nonce.
pub struct ChunkOpener {
    cipher: XSalsa20Poly1305,
    index: u64,
}

impl ChunkOpener {
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes())),
            index: 0,
        }
    }

    /// Open the next chunk; any MAC failure is `Auth(Body)`.
    pub fn open_next(&mut self, body: &[u8]) -> HoardResult<Vec<u8>> {
        let nonce = chunk_nonce(self.index);
        let plain = self
            .cipher
            .decrypt(GenericArray::from_slice(&nonce), body)
            .map_err(|_| HoardError::Auth(AuthScope::Body))?;
        self.index += 1;
        Ok(plain)
    }
}

impl Xc {
    /// Encrypt `plaintext` into `ciphertext` with bounded memory.
    ///
    /// The payload is never compressed.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        cancel: &CancellationToken,
        plaintext: R,
        recipients: &[String],
        mut ciphertext: W,
    ) -> HoardResult<()> {
        let signer = self.signer()?;
        let session_key = random_session_key();
        let header = self.encrypt_header(cancel, &signer, &session_key, recipients)?;

        let mut buf = Vec::new();
        encode_key(FIELD_VERSION, WireType::Varint, &mut buf);
        encode_varint(u64::from(MESSAGE_VERSION), &mut buf);
        encode_key(FIELD_HEADER, WireType::LengthDelimited, &mut buf);
        header.encode_length_delimited(&mut buf).map_err(|e| {
            HoardError::Internal(format!("encoding header: {e}"))
        })?;
        ciphertext.write_all(&buf)?;

        let mut count = 0u64;
        for body in SealedChunks::new(plaintext, &session_key) {
            ensure_active(cancel)?;
            let chunk = pb::Chunk { body: body? };
            buf.clear();
            encode_key(FIELD_CHUNK, WireType::LengthDelimited, &mut buf);
            chunk.encode_length_delimited(&mut buf).map_err(|e| {
                HoardError::Internal(format!("encoding chunk: {e}"))
            })?;
            ciphertext.write_all(&buf)?;
            count += 1;
        }
        ciphertext.flush()?;

        tracing::debug!(chunks = count, "encrypted stream");
        Ok(())
    }

    /// Decrypt a message from `ciphertext` into `plaintext` chunk by chunk.
    ///
    /// Compressed envelopes cannot be streamed and are rejected as malformed.
    /// Because the compression flag follows the chunks on the wire, that
    /// rejection can come after some output has been written.
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        cancel: &CancellationToken,
        mut ciphertext: R,
        mut plaintext: W,
    ) -> HoardResult<()> {
        let mut version = 0u32;
        let mut opener: Option<ChunkOpener> = None;

        while let Some((tag, wire_type)) = read_key(&mut ciphertext)? {
            ensure_active(cancel)?;
            match (tag, wire_type) {
                (FIELD_VERSION, WireType::Varint) => {
                    version = u32::try_from(read_varint_required(&mut ciphertext)?)
                        .map_err(|_| HoardError::Malformed("version overflow".into()))?;
                }
                (FIELD_HEADER, WireType::LengthDelimited) => {
                    if version != MESSAGE_VERSION {
                        return Err(HoardError::UnsupportedVersion(version));
                    }
                    let raw = read_bounded(&mut ciphertext, MAX_HEADER_LEN)?;
                    let header = pb::Header::decode(raw.as_slice())?;
                    let key = self.decrypt_session_key(cancel, &header)?;
                    opener = Some(ChunkOpener::new(&key));
                }
                (FIELD_CHUNK, WireType::LengthDelimited) => {
                    let opener = opener
                        .as_mut()
                        .ok_or_else(|| HoardError::Malformed("chunk before header".into()))?;
                    let raw = read_bounded(&mut ciphertext, MAX_CHUNK_LEN)?;
                    let chunk = pb::Chunk::decode(raw.as_slice())?;
                    plaintext.write_all(&opener.open_next(&chunk.body)?)?;
                }
                (FIELD_COMPRESSED, WireType::Varint) => {
                    if read_varint_required(&mut ciphertext)? != 0 {
                        return Err(HoardError::Malformed(
                            "compressed messages cannot be streamed".into(),
                        ));
                    }
                }
                (_, WireType::Varint) => {
                    read_varint_required(&mut ciphertext)?;
                }
                (_, WireType::LengthDelimited) => {
                    read_bounded(&mut ciphertext, MAX_HEADER_LEN)?;
                }
                (tag, _) => {
                    return Err(HoardError::Malformed(format!(
                        "unexpected wire type for field {tag}"
                    )));
                }
            }
        }

        if version != MESSAGE_VERSION {
            return Err(HoardError::UnsupportedVersion(version));
        }
        if opener.is_none() {
            return Err(HoardError::Malformed("message without header".into()));
        }
        plaintext.flush()?;
        Ok(())
    }
}

/// Read a varint; `None` on a clean end of stream before the first byte.
fn read_varint<R: Read>(r: &mut R) -> HoardResult<Option<u64>> {
    let mut value = 0u64;
    for i in 0..10 {
        let mut byte = [0u8; 1];
        let n = r.read(&mut byte)?;
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(HoardError::Malformed("truncated varint".into()));
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(HoardError::Malformed("varint too long".into()))
}

fn read_varint_required<R: Read>(r: &mut R) -> HoardResult<u64> {
    read_varint(r)?.ok_or_else(|| HoardError::Malformed("truncated message".into()))
}

fn read_key<R: Read>(r: &mut R) -> HoardResult<Option<(u32, WireType)>> {
    let Some(key) = read_varint(r)? else {
        return Ok(None);
    };
    let tag = u32::try_from(key >> 3)
        .map_err(|_| HoardError::Malformed("field tag overflow".into()))?;
    let wire_type = WireType::try_from(key & 0x7)
        .map_err(|_| HoardError::Malformed(format!("invalid wire type {}", key & 0x7)))?;
    Ok(Some((tag, wire_type)))
}

fn read_bounded<R: Read>(r: &mut R, max: u64) -> HoardResult<Vec<u8>> {
    let len = read_varint_required(r)?;
    if len > max {
        return Err(HoardError::Malformed(format!(
            "field of {len} bytes exceeds limit of {max}"
        )));
    }
    let mut buf = Vec::with_capacity(len as usize);
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(HoardError::Malformed("truncated field".into()));
    }
    Ok(buf)
}
