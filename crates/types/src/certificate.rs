//! Block certificates.
//!
//! A certificate proves that a quorum of the round's committee signed off on
//! a block hash. It carries the aggregated BLS signature and the signer key
//! set for each of the two reduction phases.

use serde::{Deserialize, Serialize};

use crate::keys::{BlsSignatureBytes, PublicKeyBytes, BLS_SIGNATURE_BYTES, PUBLIC_KEY_BYTES};
use crate::{Error, Result};

/// Aggregated proof of quorum consent on a block.
///
/// A certificate is valid iff the aggregated signature verifies against the
/// aggregated public keys of the listed committee members and the signer set
/// size reaches quorum. The `first_*` fields are the analog for the first
/// reduction phase.
///
/// Wire encoding:
///
/// ```text
/// step_u8 || agg_sig_96B || key_count_u32_le || (pk_48B)*key_count
///         || first_step_u8 || first_agg_sig_96B || first_key_count_u32_le || (first_pk_48B)*
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Certificate {
    /// Step at which the second reduction reached quorum
    pub step: u8,
    /// Aggregated BLS signature over the block hash (second reduction)
    pub signature: BlsSignatureBytes,
    /// Committee member keys that contributed to `signature`
    pub keys: Vec<PublicKeyBytes>,
    /// Step at which the first reduction reached quorum
    pub first_step: u8,
    /// Aggregated BLS signature over the block hash (first reduction)
    pub first_signature: BlsSignatureBytes,
    /// Committee member keys that contributed to `first_signature`
    pub first_keys: Vec<PublicKeyBytes>,
}

impl Certificate {
    /// A zeroed certificate carries no signers.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.first_keys.is_empty()
    }

    /// Encode to the wire byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.step);
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(&(self.keys.len() as u32).to_le_bytes());
        for key in &self.keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.push(self.first_step);
        out.extend_from_slice(self.first_signature.as_bytes());
        out.extend_from_slice(&(self.first_keys.len() as u32).to_le_bytes());
        for key in &self.first_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out
    }

    /// Length of the wire encoding.
    pub fn encoded_len(&self) -> usize {
        2 * (1 + BLS_SIGNATURE_BYTES + 4)
            + (self.keys.len() + self.first_keys.len()) * PUBLIC_KEY_BYTES
    }

    /// Decode from the wire byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let step = cursor.take_u8()?;
        let signature = BlsSignatureBytes::from_slice(cursor.take(BLS_SIGNATURE_BYTES)?)?;
        let keys = cursor.take_keys()?;
        let first_step = cursor.take_u8()?;
        let first_signature = BlsSignatureBytes::from_slice(cursor.take(BLS_SIGNATURE_BYTES)?)?;
        let first_keys = cursor.take_keys()?;

        if cursor.pos != bytes.len() {
            return Err(Error::InvalidCertificate(format!(
                "{} trailing bytes",
                bytes.len() - cursor.pos
            )));
        }

        Ok(Self {
            step,
            signature,
            keys,
            first_step,
            first_signature,
            first_keys,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::InvalidCertificate("short buffer".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let slice = self.take(4)?;
        Ok(u32::from_le_bytes(slice.try_into().expect("4-byte slice")))
    }

    fn take_keys(&mut self) -> Result<Vec<PublicKeyBytes>> {
        let count = self.take_u32()? as usize;
        // A count larger than the remaining buffer is always malformed.
        if count > self.bytes.len().saturating_sub(self.pos) / PUBLIC_KEY_BYTES {
            return Err(Error::InvalidCertificate(format!(
                "key count {} exceeds buffer",
                count
            )));
        }
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(PublicKeyBytes::from_slice(self.take(PUBLIC_KEY_BYTES)?)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Certificate {
        Certificate {
            step: 3,
            signature: BlsSignatureBytes([0xab; BLS_SIGNATURE_BYTES]),
            keys: vec![
                PublicKeyBytes([0x01; PUBLIC_KEY_BYTES]),
                PublicKeyBytes([0x02; PUBLIC_KEY_BYTES]),
            ],
            first_step: 2,
            first_signature: BlsSignatureBytes([0xcd; BLS_SIGNATURE_BYTES]),
            first_keys: vec![PublicKeyBytes([0x03; PUBLIC_KEY_BYTES])],
        }
    }

    #[test]
    fn byte_round_trip() {
        let cert = sample();
        let bytes = cert.to_bytes();
        assert_eq!(bytes.len(), cert.encoded_len());
        assert_eq!(Certificate::from_bytes(&bytes).unwrap(), cert);
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = sample().to_bytes();
        assert!(Certificate::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Certificate::from_bytes(&[]).is_err());
    }

    #[test]
    fn oversized_key_count_rejected() {
        let mut bytes = sample().to_bytes();
        // Inflate the first key count way past the buffer.
        bytes[1 + BLS_SIGNATURE_BYTES] = 0xff;
        bytes[1 + BLS_SIGNATURE_BYTES + 1] = 0xff;
        assert!(Certificate::from_bytes(&bytes).is_err());
    }

    #[test]
    fn default_is_empty() {
        assert!(Certificate::default().is_empty());
        assert!(!sample().is_empty());
    }
}
