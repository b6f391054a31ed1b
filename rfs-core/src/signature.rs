//! Block signatures for content-defined chunks
//!
//! A signature set describes one snapshot of a byte stream as an ordered,
//! contiguous list of blocks, each identified by the SHA-256 of its content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

/// Magic bytes prefixed to encoded signature sets.
pub const SIGNATURE_MAGIC: &[u8; 4] = b"RFSS";

/// zstd level used when encoding signature sets for storage.
const ENCODE_LEVEL: i32 = 3;

/// Strong checksum of one block's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Create a checksum from raw digest bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the checksum of a block
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One content-defined block of a byte stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Offset of the first byte of the block
    pub offset: u64,
    /// Block length in bytes
    pub length: u32,
    /// SHA-256 of the block content
    pub checksum: Checksum,
}

impl BlockSignature {
    pub fn new(offset: u64, length: u32, checksum: Checksum) -> Self {
        Self {
            offset,
            length,
            checksum,
        }
    }

    /// Offset one past the last byte of the block
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

/// Ordered signatures covering a whole stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSet {
    /// Blocks in stream order
    pub blocks: Vec<BlockSignature>,
    /// Total length of the described stream
    pub length: u64,
}

impl SignatureSet {
    /// Signature set of an empty stream
    pub fn empty() -> Self {
        Self {
            blocks: Vec::new(),
            length: 0,
        }
    }

    /// Build a signature set, rejecting blocks that do not tile `[0, length)`
    pub fn new(blocks: Vec<BlockSignature>, length: u64) -> Result<Self> {
        let set = Self { blocks, length };
        set.validate()?;
        Ok(set)
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over blocks in stream order
    pub fn iter(&self) -> impl Iterator<Item = &BlockSignature> {
        self.blocks.iter()
    }

    /// Check that blocks are ordered, contiguous, non-empty and end at `length`.
    pub fn validate(&self) -> Result<()> {
        let mut expected = 0u64;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.length == 0 {
                return Err(SyncError::InvalidInput(format!(
                    "block {} at offset {} has zero length",
                    i, block.offset
                )));
            }
            if block.offset != expected {
                return Err(SyncError::InvalidInput(format!(
                    "block {} starts at offset {}, expected {}",
                    i, block.offset, expected
                )));
            }
            expected = block.end();
        }
        if expected != self.length {
            return Err(SyncError::InvalidInput(format!(
                "blocks cover {} bytes but the set declares {}",
                expected, self.length
            )));
        }
        Ok(())
    }

    /// Encode for storage: `[magic(4)] [uncompressed_len(4)] [zstd(bincode)]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let compressed = zstd::encode_all(&payload[..], ENCODE_LEVEL)?;
        let mut buf = Vec::with_capacity(8 + compressed.len());
        buf.extend_from_slice(SIGNATURE_MAGIC);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&compressed);
        Ok(buf)
    }

    /// Decode a set produced by [`SignatureSet::encode`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(SyncError::Serialization(
                "signature data too short for header".to_string(),
            ));
        }
        if &data[0..4] != SIGNATURE_MAGIC {
            return Err(SyncError::Serialization(
                "invalid signature magic".to_string(),
            ));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[4..8]);
        let expected_len = u32::from_le_bytes(len_bytes) as usize;

        let payload = zstd::decode_all(&data[8..])?;
        if payload.len() != expected_len {
            return Err(SyncError::Serialization(format!(
                "signature payload is {} bytes, header says {}",
                payload.len(),
                expected_len
            )));
        }
        let set: SignatureSet = bincode::deserialize(&payload)?;
        set.validate()?;
        Ok(set)
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, data: &[u8]) -> BlockSignature {
        BlockSignature::new(offset, data.len() as u32, Checksum::from_data(data))
    }

    #[test]
    fn test_checksum_hex_roundtrip() {
        let sum = Checksum::from_data(b"hello");
        let parsed = Checksum::from_hex(&sum.to_hex()).unwrap();
        assert_eq!(sum, parsed);
        assert!(Checksum::from_hex("abcd").is_err());
    }

    #[test]
    fn test_empty_set_is_valid() {
        let set = SignatureSet::empty();
        assert!(set.validate().is_ok());
        assert!(set.is_empty());
        assert_eq!(set.length, 0);
    }

    #[test]
    fn test_contiguous_set_is_valid() {
        let set = SignatureSet::new(vec![block(0, b"abc"), block(3, b"defg")], 7).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.blocks[1].end(), 7);
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = SignatureSet::new(vec![block(0, b"abc"), block(4, b"defg")], 8).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = SignatureSet::new(vec![block(0, b"abc"), block(2, b"defg")], 6).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_wrong_total_length_is_rejected() {
        let err = SignatureSet::new(vec![block(0, b"abc")], 10).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_zero_length_block_is_rejected() {
        let err = SignatureSet::new(vec![block(0, b"abc"), block(3, b"")], 3).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_encode_decode() {
        let set = SignatureSet::new(vec![block(0, b"abc"), block(3, b"defg")], 7).unwrap();
        let encoded = set.encode().unwrap();
        assert_eq!(&encoded[0..4], SIGNATURE_MAGIC);
        assert_eq!(SignatureSet::decode(&encoded).unwrap(), set);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut encoded = SignatureSet::empty().encode().unwrap();
        encoded[0] = b'X';
        assert!(matches!(
            SignatureSet::decode(&encoded),
            Err(SyncError::Serialization(_))
        ));
    }
}
