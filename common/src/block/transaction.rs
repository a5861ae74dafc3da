use crate::{
    crypto::{Hash, Hashable},
    serializer::{Reader, ReaderError, Serializer, Writer},
};

// Bounds enforced while decoding untrusted transaction bodies.
const MAX_INPUTS: usize = 4096;
const MAX_OUTPUTS: usize = 4096;
const MAX_SCRIPT_SIZE: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            hash: Hash::zero(),
            index: u32::MAX,
        }
    }
}

impl Serializer for OutPoint {
    fn write(&self, writer: &mut Writer) {
        self.hash.write(writer);
        writer.write_u32(&self.index);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            hash: Hash::read(reader)?,
            index: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        self.hash.size() + 4
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Serializer for TxIn {
    fn write(&self, writer: &mut Writer) {
        self.previous_output.write(writer);
        writer.write_vec(&self.script_sig);
        writer.write_u32(&self.sequence);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let previous_output = OutPoint::read(reader)?;
        let script_sig = reader.read_vec()?;
        if script_sig.len() > MAX_SCRIPT_SIZE {
            return Err(ReaderError::InvalidValue);
        }
        Ok(Self {
            previous_output,
            script_sig,
            sequence: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        self.previous_output.size() + 4 + self.script_sig.len() + 4
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Serializer for TxOut {
    fn write(&self, writer: &mut Writer) {
        writer.write_i64(&self.value);
        writer.write_vec(&self.script_pubkey);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let value = reader.read_i64()?;
        let script_pubkey = reader.read_vec()?;
        if script_pubkey.len() > MAX_SCRIPT_SIZE {
            return Err(ReaderError::InvalidValue);
        }
        Ok(Self {
            value,
            script_pubkey,
        })
    }

    fn size(&self) -> usize {
        8 + 4 + self.script_pubkey.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// A coinbase spends the null outpoint and is the only transaction
    /// allowed to do so.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output == OutPoint::null()
    }

    /// The variable slot of a coinbase: the controller rewrites this value
    /// with the per-algorithm subsidy when building the coinbase set.
    pub fn set_last_output_value(&mut self, value: i64) -> Result<(), ReaderError> {
        match self.outputs.last_mut() {
            Some(out) => {
                out.value = value;
                Ok(())
            }
            None => Err(ReaderError::InvalidValue),
        }
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        writer.write_i32(&self.version);
        writer.write_u16(self.inputs.len() as u16);
        for input in &self.inputs {
            input.write(writer);
        }
        writer.write_u16(self.outputs.len() as u16);
        for output in &self.outputs {
            output.write(writer);
        }
        writer.write_u32(&self.lock_time);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_i32()?;
        let input_count = reader.read_u16()? as usize;
        if input_count > MAX_INPUTS {
            return Err(ReaderError::InvalidValue);
        }
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxIn::read(reader)?);
        }
        let output_count = reader.read_u16()? as usize;
        if output_count > MAX_OUTPUTS {
            return Err(ReaderError::InvalidValue);
        }
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOut::read(reader)?);
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time: reader.read_u32()?,
        })
    }

    fn size(&self) -> usize {
        4 + 2
            + self.inputs.iter().map(Serializer::size).sum::<usize>()
            + 2
            + self.outputs.iter().map(Serializer::size).sum::<usize>()
            + 4
    }
}

impl Hashable for Transaction {}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn coinbase_with_value(value: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: vec![0x04, 0xFF],
                sequence: u32::MAX,
            }],
            outputs: vec![
                TxOut {
                    value: 0,
                    script_pubkey: vec![0x6A],
                },
                TxOut {
                    value,
                    script_pubkey: vec![0x51],
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn test_transaction_round_trip() {
        let tx = coinbase_with_value(5_000_000_000);
        let bytes = tx.to_bytes();
        assert_eq!(bytes.len(), tx.size());
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_coinbase_detection() {
        let tx = coinbase_with_value(1);
        assert!(tx.is_coinbase());

        let mut spend = tx.clone();
        spend.inputs[0].previous_output.index = 0;
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn test_last_output_rewrite_changes_hash() {
        let mut tx = coinbase_with_value(100);
        let before = tx.hash();
        tx.set_last_output_value(200).unwrap();
        assert_ne!(before, tx.hash());
    }
}
