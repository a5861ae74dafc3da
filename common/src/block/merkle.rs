// Merkle root calculation for transaction lists

use crate::crypto::{Hash, Hashable};

use super::Transaction;

/// Calculate the merkle root of a transaction list.
///
/// Leaves are transaction digests; parents are hash(left || right); an odd
/// node at any level is paired with itself. The controller recomputes this
/// per algorithm because every algorithm gets its own coinbase.
pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::zero();
    }

    let mut hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();

    if hashes.len() == 1 {
        return hash_pair(&hashes[0], &hashes[0]);
    }

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));
        for chunk in hashes.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next_level.push(hash_pair(left, right));
        }
        hashes = next_level;
    }

    hashes.swap_remove(0)
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::new(*hasher.finalize().as_bytes())
}
