//! Inventory vectors.
//!
//! `Inv` advertises data by hash; `GetData` requests the subset the receiver
//! is missing. The byte layout is pinned by the protocol:
//! `count_u32_le || (type_u8 || hash_32B)*`.

use umbra_types::Hash;

use crate::{Result, WireError};

/// What an inventory item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvType {
    /// A full block
    Block = 0,
    /// A mempool transaction
    MempoolTx = 1,
}

impl InvType {
    fn from_byte(byte: u8) -> Result<InvType> {
        match byte {
            0 => Ok(InvType::Block),
            1 => Ok(InvType::MempoolTx),
            other => Err(WireError::PayloadDecode(format!(
                "unknown inv type {}",
                other
            ))),
        }
    }
}

/// One advertised item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvItem {
    /// Item kind
    pub inv_type: InvType,
    /// Content hash of the item
    pub hash: Hash,
}

/// A length-prefixed list of inventory items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvMessage {
    /// The advertised items
    pub items: Vec<InvItem>,
}

impl InvMessage {
    /// An empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item.
    pub fn add(&mut self, inv_type: InvType, hash: Hash) {
        self.items.push(InvItem { inv_type, hash });
    }

    /// All hashes of a given type.
    pub fn hashes_of(&self, inv_type: InvType) -> Vec<Hash> {
        self.items
            .iter()
            .filter(|i| i.inv_type == inv_type)
            .map(|i| i.hash)
            .collect()
    }

    /// Encode to the pinned byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.items.len() * 33);
        out.extend_from_slice(&(self.items.len() as u32).to_le_bytes());
        for item in &self.items {
            out.push(item.inv_type as u8);
            out.extend_from_slice(item.hash.as_bytes());
        }
        out
    }

    /// Decode from the pinned byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(WireError::PayloadDecode("inv too short".into()));
        }
        let count = u32::from_le_bytes(bytes[..4].try_into().expect("4-byte slice")) as usize;
        let body = &bytes[4..];
        if body.len() != count * 33 {
            return Err(WireError::PayloadDecode(format!(
                "inv length {} does not match count {}",
                body.len(),
                count
            )));
        }

        let mut items = Vec::with_capacity(count);
        for chunk in body.chunks_exact(33) {
            items.push(InvItem {
                inv_type: InvType::from_byte(chunk[0])?,
                hash: Hash::from_slice(&chunk[1..])
                    .map_err(|e| WireError::PayloadDecode(e.to_string()))?,
            });
        }
        Ok(Self { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut inv = InvMessage::new();
        inv.add(InvType::Block, Hash::sha3(b"block"));
        inv.add(InvType::MempoolTx, Hash::sha3(b"t1"));
        inv.add(InvType::MempoolTx, Hash::sha3(b"t2"));

        let decoded = InvMessage::from_bytes(&inv.to_bytes()).unwrap();
        assert_eq!(decoded, inv);
        assert_eq!(decoded.hashes_of(InvType::MempoolTx).len(), 2);
    }

    #[test]
    fn empty_round_trip() {
        let inv = InvMessage::new();
        assert_eq!(InvMessage::from_bytes(&inv.to_bytes()).unwrap(), inv);
    }

    #[test]
    fn malformed_rejected() {
        assert!(InvMessage::from_bytes(&[]).is_err());
        // Count says 1, no body.
        assert!(InvMessage::from_bytes(&1u32.to_le_bytes()).is_err());
        // Unknown inv type.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(9);
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(InvMessage::from_bytes(&bytes).is_err());
    }
}
