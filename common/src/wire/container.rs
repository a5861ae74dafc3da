use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// More fields than any bus message carries; decoding rejects beyond this.
const MAX_FIELDS: usize = 32;

/// A simple field container: count-prefixed list of length-prefixed opaque
/// fields. Message kinds are typed views over one of these.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Container {
    fields: Vec<Vec<u8>>,
}

impl Container {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn push<S: Serializer>(&mut self, field: &S) {
        self.fields.push(field.to_bytes());
    }

    pub fn push_raw(&mut self, bytes: Vec<u8>) {
        self.fields.push(bytes);
    }

    pub fn get<S: Serializer>(&self, index: usize) -> Result<S, ReaderError> {
        let bytes = self.get_raw(index)?;
        S::from_bytes(bytes)
    }

    pub fn get_raw(&self, index: usize) -> Result<&[u8], ReaderError> {
        self.fields
            .get(index)
            .map(Vec::as_slice)
            .ok_or(ReaderError::InvalidSize)
    }

    pub fn count(&self) -> usize {
        self.fields.len()
    }
}

impl Serializer for Container {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.fields.len() as u16);
        for field in &self.fields {
            writer.write_vec(field);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u16()? as usize;
        if count > MAX_FIELDS {
            return Err(ReaderError::InvalidValue);
        }
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(reader.read_vec()?);
        }
        Ok(Self { fields })
    }

    fn size(&self) -> usize {
        2 + self.fields.iter().map(|f| 4 + f.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    #[test]
    fn test_container_round_trip() {
        let mut container = Container::new();
        container.push(&7u16);
        container.push(&hash(b"field"));
        container.push_raw(vec![1, 2, 3]);

        let bytes = container.to_bytes();
        assert_eq!(bytes.len(), container.size());

        let decoded = Container::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, container);
        assert_eq!(decoded.get::<u16>(0).unwrap(), 7);
        assert_eq!(decoded.get_raw(2).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_field() {
        let container = Container::new();
        assert!(container.get::<u16>(0).is_err());
    }

    #[test]
    fn test_field_count_bound() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FIELDS as u16 + 1).to_be_bytes());
        assert!(Container::from_bytes(&bytes).is_err());
    }
}
