use std::fmt::{Display, Error as FmtError, Formatter};

use crate::{
    crypto::Hash,
    fork::{Fork, ForkError},
    serializer::{Reader, ReaderError, Serializer, Writer},
};

use super::HEADER_SIZE;

/// Block header of the multi-algorithm chain.
///
/// The version field doubles as the algorithm identifier: the hash function
/// used to evaluate this header against its target is selected by
/// `(version, height)` through the fork dispatch table. The worker mutates
/// version, merkle_root, bits and nonce in place on the hot path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(version: i32, prev_block: Hash, merkle_root: Hash, timestamp: u32, bits: u32) -> Self {
        Self {
            version,
            prev_block,
            merkle_root,
            timestamp,
            bits,
            nonce: 0,
        }
    }

    /// Proof-of-work hash under the algorithm selected by the header version
    /// at the given height.
    pub fn pow_hash(&self, fork: &Fork, height: u64) -> Result<Hash, ForkError> {
        fork.pow_hash(self.version, height, &self.to_bytes())
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_i32(&self.version);
        self.prev_block.write(writer);
        self.merkle_root.write(writer);
        writer.write_u32(&self.timestamp);
        writer.write_u32(&self.bits);
        writer.write_u32(&self.nonce);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_block: Hash::read(reader)?,
            merkle_root: Hash::read(reader)?,
            timestamp: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        HEADER_SIZE
    }
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "BlockHeader[version: {}, prev: {}, merkle: {}, time: {}, bits: {:08x}, nonce: {}]",
            self.version, self.prev_block, self.merkle_root, self.timestamp, self.bits, self.nonce
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    #[test]
    fn test_header_round_trip() {
        let header = BlockHeader {
            version: 514,
            prev_block: hash(b"prev"),
            merkle_root: hash(b"merkle"),
            timestamp: 1234567890,
            bits: 0x1d00ffff,
            nonce: 42,
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes.len(), header.size());
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_truncated() {
        let header = BlockHeader::new(2, Hash::zero(), Hash::zero(), 0, 0);
        let bytes = header.to_bytes();
        assert!(BlockHeader::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
    }
}
