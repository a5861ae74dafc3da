use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReaderError {
    #[error("not enough bytes left in the buffer")]
    InvalidSize,
    #[error("invalid value encountered while decoding")]
    InvalidValue,
    #[error("invalid hex string")]
    InvalidHex,
}

/// Cursor over a byte slice. All integers are big-endian.
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, total: 0 }
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        if count > self.bytes.len() {
            return Err(ReaderError::InvalidSize);
        }
        let (taken, rest) = self.bytes.split_at(count);
        self.bytes = rest;
        self.total += count;
        Ok(taken)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        let bytes = self.read_bytes(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ReaderError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        Ok(self.read_u64()? as i64)
    }

    /// u32 length prefix followed by that many bytes.
    pub fn read_vec(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn consumed(&self) -> usize {
        self.total
    }
}
