//! hoard-crypto: the XC hybrid encryption scheme and its keyrings
//!
//! Envelope layout:
//! ```text
//! Message { version = 1, compressed, header, chunks }
//!   header.sender      = signer fingerprint
//!   header.recipients  = { fp -> nonce(24) || box(session_key, signer_sk, recipient_pk) }
//!   chunks[i]          = secretbox(plaintext[i*16K..], nonce = be64(i) || 0^16, session_key)
//! ```
//!
//! Private keys are locked at rest with XSalsa20-Poly1305 under an Argon2id
//! key derived from the owner's passphrase. The [`Agent`] caches passphrases.

pub mod agent;
pub mod cipher;
pub mod fingerprint;
pub mod kdf;
pub mod keyring;
pub mod keys;
pub mod stream;

pub use agent::{Agent, Prompter, StaticPrompter, TerminalPrompter};
pub use cipher::Xc;
pub use fingerprint::fingerprint;
pub use kdf::{derive_key, KdfProfile, SymmetricKey};
pub use keyring::{KeyRing, Pubring, Secring};
pub use keys::{Identity, PrivateKey, PublicKey, UnlockedKey};

/// Size of symmetric and Curve25519 keys in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an XSalsa20 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the Argon2id salt stored with each private key
pub const SALT_SIZE: usize = 16;

/// Maximum plaintext bytes per body chunk
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Envelope version written and accepted
pub const MESSAGE_VERSION: u32 = 1;

/// Algorithm tag for NaCl Curve25519 keys
pub const ALGO_NACL_CURVE25519: u32 = 0;
