mod block;
mod header;
mod merkle;
mod transaction;

pub use block::Block;
pub use header::BlockHeader;
pub use merkle::calculate_merkle_root;
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};

// Serialized size of a block header: version (4) + prev_block (32) +
// merkle_root (32) + timestamp (4) + bits (4) + nonce (4).
pub const HEADER_SIZE: usize = 80;
