use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use blake3::hash as blake3_hash;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits

#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub const fn max() -> Self {
        Hash::new([u8::MAX; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ReaderError::InvalidHex)?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| ReaderError::InvalidHex)?;
        Ok(Hash::new(bytes))
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_hex())
    }
}

impl Serializer for Hash {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Hash::new(reader.read_bytes_32()?))
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Hash::from_str(&hex).map_err(|e| SerdeError::custom(e.to_string()))
    }
}

// Hash a byte slice using the blake3 algorithm. This is the digest used for
// transaction ids, merkle trees and message deduplication keys; proof-of-work
// hashing goes through the fork dispatch table instead.
pub fn hash(value: &[u8]) -> Hash {
    Hash(blake3_hash(value).into())
}

pub trait Hashable: Serializer {
    fn hash(&self) -> Hash {
        hash(&self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_round_trip() {
        let h = hash(b"kopach");
        let parsed = Hash::from_str(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_hash_serializer_round_trip() {
        let h = hash(b"some data");
        let bytes = h.clone().to_bytes();
        assert_eq!(Hash::from_bytes(&bytes).unwrap(), h);
    }

    #[test]
    fn test_zero_is_minimum() {
        assert!(Hash::zero() < Hash::max());
    }
}
