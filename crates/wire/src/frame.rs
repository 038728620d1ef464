//! Gossip frame codec.
//!
//! ```text
//! len_le32 || magic_le32 || checksum_4B || topic_u8 || payload
//! ```
//!
//! `len` counts everything after itself (magic + checksum + topic +
//! payload). The checksum is the first four bytes of
//! Blake2b-256(topic || payload).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use umbra_crypto::hash::{checksum, CHECKSUM_BYTES};

use crate::topics::Topic;
use crate::{Result, WireError};

/// Hard bound on the frame length field.
pub const MAX_FRAME_SIZE: usize = 250_000;

/// Bytes of the frame header following the length prefix, minus payload.
const HEADER_AFTER_LEN: usize = 4 + CHECKSUM_BYTES + 1;

/// The network a node speaks on. Mismatched magic terminates the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Magic {
    /// Production network
    MainNet = 0x7630_401f,
    /// Public test network
    TestNet = 0x7474_6e41,
    /// Development network
    DevNet = 0x7473_6e40,
}

impl Magic {
    /// Decode a magic value; unknown values are rejected.
    pub fn from_u32(value: u32) -> Option<Magic> {
        match value {
            0x7630_401f => Some(Magic::MainNet),
            0x7474_6e41 => Some(Magic::TestNet),
            0x7473_6e40 => Some(Magic::DevNet),
            _ => None,
        }
    }

    /// The wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Magic::MainNet => write!(f, "mainnet"),
            Magic::TestNet => write!(f, "testnet"),
            Magic::DevNet => write!(f, "devnet"),
        }
    }
}

/// A decoded frame: topic plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The topic byte, decoded
    pub topic: Topic,
    /// The raw payload body
    pub payload: Vec<u8>,
}

impl Frame {
    /// Wrap a payload under a topic.
    pub fn new(topic: Topic, payload: Vec<u8>) -> Self {
        Self { topic, payload }
    }

    /// Encode with the given network magic.
    pub fn encode(&self, magic: Magic) -> Result<Vec<u8>> {
        let body_len = HEADER_AFTER_LEN + self.payload.len();
        if body_len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(body_len));
        }

        let cs = checksum(self.topic.as_byte(), &self.payload);

        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());
        out.extend_from_slice(&magic.as_u32().to_le_bytes());
        out.extend_from_slice(&cs);
        out.push(self.topic.as_byte());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode a frame from a complete buffer.
    pub fn decode(bytes: &[u8], expected_magic: Magic) -> Result<Frame> {
        if bytes.len() < 4 {
            return Err(WireError::ShortRead);
        }
        let len = u32::from_le_bytes(bytes[..4].try_into().expect("4-byte slice")) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(len));
        }
        if bytes.len() < 4 + len || len < HEADER_AFTER_LEN {
            return Err(WireError::ShortRead);
        }
        Self::decode_body(&bytes[4..4 + len], expected_magic)
    }

    /// Decode the post-length portion of a frame.
    fn decode_body(body: &[u8], expected_magic: Magic) -> Result<Frame> {
        let magic = u32::from_le_bytes(body[..4].try_into().expect("4-byte slice"));
        if magic != expected_magic.as_u32() {
            return Err(WireError::InvalidMagic {
                expected: expected_magic.as_u32(),
                got: magic,
            });
        }

        let cs: [u8; CHECKSUM_BYTES] = body[4..4 + CHECKSUM_BYTES]
            .try_into()
            .expect("checksum slice");
        let topic_byte = body[4 + CHECKSUM_BYTES];
        let payload = &body[HEADER_AFTER_LEN..];

        if checksum(topic_byte, payload) != cs {
            return Err(WireError::ChecksumMismatch);
        }

        Ok(Frame {
            topic: Topic::from_byte(topic_byte),
            payload: payload.to_vec(),
        })
    }

    /// Read one frame from an async stream.
    ///
    /// Validates the length bound before allocating; a magic or checksum
    /// failure consumes the frame so the stream stays aligned.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        expected_magic: Magic,
    ) -> Result<Frame> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(len));
        }
        if len < HEADER_AFTER_LEN {
            return Err(WireError::ShortRead);
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Self::decode_body(&body, expected_magic)
    }

    /// Write one frame to an async stream.
    pub async fn write_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        magic: Magic,
    ) -> Result<()> {
        let bytes = self.encode(magic)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn round_trip_random_payloads() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for magic in [Magic::MainNet, Magic::TestNet, Magic::DevNet] {
            for _ in 0..50 {
                let topic = Topic::from_byte(rng.gen_range(0..48));
                let len = rng.gen_range(0..2048);
                let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

                let frame = Frame::new(topic, payload);
                let encoded = frame.encode(magic).unwrap();
                let decoded = Frame::decode(&encoded, magic).unwrap();
                assert_eq!(decoded, frame);
            }
        }
    }

    #[test]
    fn bit_flip_in_checksum_is_detected() {
        let frame = Frame::new(Topic::Tx, b"payload".to_vec());
        let mut encoded = frame.encode(Magic::DevNet).unwrap();
        encoded[8] ^= 0x01; // first checksum byte
        assert!(matches!(
            Frame::decode(&encoded, Magic::DevNet),
            Err(WireError::ChecksumMismatch)
        ));
    }

    #[test]
    fn bit_flip_in_payload_is_detected() {
        let frame = Frame::new(Topic::Tx, b"payload".to_vec());
        let mut encoded = frame.encode(Magic::DevNet).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x80;
        assert!(matches!(
            Frame::decode(&encoded, Magic::DevNet),
            Err(WireError::ChecksumMismatch)
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let frame = Frame::new(Topic::Ping, Vec::new());
        let encoded = frame.encode(Magic::MainNet).unwrap();
        assert!(matches!(
            Frame::decode(&encoded, Magic::TestNet),
            Err(WireError::InvalidMagic { .. })
        ));

        // A flipped magic bit is also InvalidMagic, not a checksum error.
        let mut corrupted = frame.encode(Magic::MainNet).unwrap();
        corrupted[4] ^= 0x01;
        assert!(matches!(
            Frame::decode(&corrupted, Magic::MainNet),
            Err(WireError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut encoded = Frame::new(Topic::Ping, Vec::new())
            .encode(Magic::DevNet)
            .unwrap();
        encoded[..4].copy_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_le_bytes());
        assert!(matches!(
            Frame::decode(&encoded, Magic::DevNet),
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn truncated_buffer_is_short_read() {
        let encoded = Frame::new(Topic::Tx, b"abc".to_vec())
            .encode(Magic::DevNet)
            .unwrap();
        assert!(matches!(
            Frame::decode(&encoded[..encoded.len() - 2], Magic::DevNet),
            Err(WireError::ShortRead)
        ));
        assert!(matches!(
            Frame::decode(&encoded[..3], Magic::DevNet),
            Err(WireError::ShortRead)
        ));
    }

    #[tokio::test]
    async fn async_read_matches_slice_decode() {
        let frame = Frame::new(Topic::Block, vec![7u8; 100]);
        let encoded = frame.encode(Magic::TestNet).unwrap();
        let mut reader = std::io::Cursor::new(encoded);
        let decoded = Frame::read_from(&mut reader, Magic::TestNet).await.unwrap();
        assert_eq!(decoded, frame);
    }
}
