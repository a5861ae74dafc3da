//! The work bus wire format.
//!
//! Every bus message is a 4-byte magic followed by a container of
//! length-prefixed fields. The sender encrypts the whole plaintext once
//! with an AEAD keyed by the shared miner passphrase, then splits the
//! ciphertext into shards that each fit one UDP datagram. The receiver
//! reassembles per (source, message id), decrypts, and dispatches on the
//! magic. Possession of the passphrase is the only authentication.

mod channel;
mod cipher;
mod container;
mod shards;

pub use channel::{Channel, ChannelConfig};
pub use cipher::WireCipher;
pub use container::Container;
pub use shards::{make_shards, Reassembler, Shard, MAX_SHARD_PAYLOAD, SHARD_HEADER_SIZE};

use thiserror::Error;

use crate::serializer::ReaderError;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cipher initialization failed")]
    Cipher,
    #[error("nonce generation failed")]
    NonceGeneration,
    #[error("encryption failed")]
    Encrypt,
    #[error("message failed authentication")]
    Decrypt,
    #[error("serialization error: {0}")]
    Serialization(#[from] ReaderError),
    #[error("unknown message magic {0:02x?}")]
    UnknownMagic([u8; 4]),
    #[error("message would need more than {0} shards")]
    TooManyShards(usize),
    #[error("empty message")]
    Empty,
}
