use crate::serializer::{Reader, ReaderError, Serializer, Writer};

use super::{BlockHeader, Transaction};

const MAX_TRANSACTIONS: usize = 65_535;

/// A full block: header plus transaction body.
///
/// Workers broadcast solutions with an empty body; the controller rebuilds
/// the body from its coinbase set and cached transaction list before
/// submitting to the chain engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            transactions: Vec::new(),
        }
    }

    pub fn with_transactions(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_u16(self.transactions.len() as u16);
        for tx in &self.transactions {
            tx.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let header = BlockHeader::read(reader)?;
        let count = reader.read_u16()? as usize;
        if count > MAX_TRANSACTIONS {
            return Err(ReaderError::InvalidValue);
        }
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::read(reader)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    fn size(&self) -> usize {
        self.header.size() + 2 + self.transactions.iter().map(Serializer::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash, Hash};

    #[test]
    fn test_empty_block_round_trip() {
        let block = Block::new(BlockHeader::new(2, hash(b"tip"), Hash::zero(), 100, 0x1d00ffff));
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), block.size());
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);
    }
}
