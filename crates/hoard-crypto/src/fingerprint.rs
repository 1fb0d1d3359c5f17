//! Key fingerprints: SHAKE256(0x42 || algo || pubkey), first 20 bytes, hex.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

/// Fingerprint length in bytes before hex encoding.
pub const FINGERPRINT_LEN: usize = 20;

/// Compute the 40-character fingerprint of a public key.
///
/// Identity metadata is not hashed, so renaming a key keeps its fingerprint.
pub fn fingerprint(algo: u32, pubkey: &[u8]) -> String {
    let mut hasher = Shake256::default();
    hasher.update(&[0x42]);
    // algo is encoded as a single byte
    hasher.update(&[algo as u8]);
    hasher.update(pubkey);

    let mut out = [0u8; FINGERPRINT_LEN];
    hasher.finalize_xof().read(&mut out);
    hex::encode(out)
}

/// Whether `s` looks like a full fingerprint (40 lowercase hex chars).
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN * 2 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
