mod hash;

pub use hash::{hash, Hash, Hashable, HASH_SIZE};
