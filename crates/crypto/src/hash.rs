//! Digest helpers.
//!
//! Sha3-256 is the content hash used for blocks, transactions, sortition
//! draws and the common coin. Blake2b-256 feeds the 4-byte frame checksum on
//! the wire.

use blake2::digest::consts::U32;
use blake2::Blake2b;
use sha3::{Digest, Sha3_256};

/// Blake2b with a 32-byte output.
type Blake2b256 = Blake2b<U32>;

/// Length of the wire frame checksum.
pub const CHECKSUM_BYTES: usize = 4;

/// Sha3-256 digest of the input.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Sha3-256 over multiple segments without intermediate allocation.
pub fn sha3_256_multi(segments: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for segment in segments {
        hasher.update(segment);
    }
    hasher.finalize().into()
}

/// Blake2b-256 digest of the input.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of Blake2b-256 over `topic || payload`.
pub fn checksum(topic: u8, payload: &[u8]) -> [u8; CHECKSUM_BYTES] {
    let mut hasher = Blake2b256::new();
    hasher.update([topic]);
    hasher.update(payload);
    let digest: [u8; 32] = hasher.finalize().into();
    let mut out = [0u8; CHECKSUM_BYTES];
    out.copy_from_slice(&digest[..CHECKSUM_BYTES]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_is_deterministic() {
        assert_eq!(sha3_256(b"umbra"), sha3_256(b"umbra"));
        assert_ne!(sha3_256(b"umbra"), sha3_256(b"umbrb"));
    }

    #[test]
    fn multi_matches_concatenation() {
        let joined = sha3_256(b"hello world");
        let split = sha3_256_multi(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, split);
    }

    #[test]
    fn checksum_depends_on_topic() {
        let a = checksum(1, b"payload");
        let b = checksum(2, b"payload");
        assert_ne!(a, b);
    }
}
