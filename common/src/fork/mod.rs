//! Fork-epoch table: which algorithms are valid at which heights, and how
//! a header version is mapped to a proof-of-work hash function.
//!
//! The algorithm set is immutable within an epoch. Hash selection is a
//! lookup on a `Fork` context value built from the network at startup;
//! there is no process-global testnet flag.

mod compact;
mod subsidy;

pub use compact::{big_to_compact, compact_to_big, hash_meets_target, hash_to_big};
pub use subsidy::calc_block_subsidy;

use indexmap::IndexMap;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Keccak256, Sha3_256};
use thiserror::Error;

use crate::{crypto::Hash, network::Network};

/// Compact difficulty target per algorithm version, recomputed by the chain
/// engine at each new tip.
pub type TargetBits = IndexMap<i32, u32>;

#[derive(Error, Debug)]
pub enum ForkError {
    #[error("algorithm version {0} is not valid at height {1}")]
    UnknownAlgorithm(i32, u64),
}

pub struct Algorithm {
    pub version: i32,
    pub name: &'static str,
    hash: fn(&[u8]) -> Hash,
}

fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Hash::new(Sha256::digest(first).into())
}

fn keccak(data: &[u8]) -> Hash {
    Hash::new(Keccak256::digest(data).into())
}

fn keccakd(data: &[u8]) -> Hash {
    let first = Keccak256::digest(data);
    Hash::new(Keccak256::digest(first).into())
}

fn sha3(data: &[u8]) -> Hash {
    Hash::new(Sha3_256::digest(data).into())
}

fn sha3d(data: &[u8]) -> Hash {
    let first = Sha3_256::digest(data);
    Hash::new(Sha3_256::digest(first).into())
}

fn blake3p(data: &[u8]) -> Hash {
    Hash::new(*blake3::hash(data).as_bytes())
}

fn blake3d(data: &[u8]) -> Hash {
    let first = blake3::hash(data);
    Hash::new(*blake3::hash(first.as_bytes()).as_bytes())
}

fn sha512t(data: &[u8]) -> Hash {
    let digest = Sha512::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash::new(out)
}

fn hybrid(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Hash::new(Keccak256::digest(first).into())
}

/// Epoch 0: the two launch algorithms.
pub const LEGACY_ALGOS: [Algorithm; 2] = [
    Algorithm {
        version: 2,
        name: "sha256d",
        hash: sha256d,
    },
    Algorithm {
        version: 514,
        name: "keccak",
        hash: keccak,
    },
];

/// Epoch 1 (HF1): nine algorithms, one coinbase and merkle root each.
pub const PLAN_ALGOS: [Algorithm; 9] = [
    Algorithm {
        version: 5,
        name: "blake3",
        hash: blake3p,
    },
    Algorithm {
        version: 6,
        name: "sha256d",
        hash: sha256d,
    },
    Algorithm {
        version: 7,
        name: "keccak",
        hash: keccak,
    },
    Algorithm {
        version: 8,
        name: "sha3",
        hash: sha3,
    },
    Algorithm {
        version: 9,
        name: "blake3d",
        hash: blake3d,
    },
    Algorithm {
        version: 10,
        name: "sha512t",
        hash: sha512t,
    },
    Algorithm {
        version: 11,
        name: "keccakd",
        hash: keccakd,
    },
    Algorithm {
        version: 12,
        name: "sha3d",
        hash: sha3d,
    },
    Algorithm {
        version: 13,
        name: "hybrid",
        hash: hybrid,
    },
];

/// HF1 activation heights.
pub const HF1_MAINNET_HEIGHT: u64 = 250_000;
pub const HF1_TESTNET_HEIGHT: u64 = 100;

/// Fork context: owns the epoch table for one network.
#[derive(Clone, Copy, Debug)]
pub struct Fork {
    network: Network,
}

impl Fork {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn activation_height(&self) -> u64 {
        match self.network {
            Network::Mainnet => HF1_MAINNET_HEIGHT,
            Network::Testnet => HF1_TESTNET_HEIGHT,
        }
    }

    pub fn algos_at(&self, height: u64) -> &'static [Algorithm] {
        if height >= self.activation_height() {
            &PLAN_ALGOS
        } else {
            &LEGACY_ALGOS
        }
    }

    pub fn versions_at(&self, height: u64) -> Vec<i32> {
        self.algos_at(height).iter().map(|a| a.version).collect()
    }

    pub fn algo_at(&self, version: i32, height: u64) -> Option<&'static Algorithm> {
        self.algos_at(height).iter().find(|a| a.version == version)
    }

    pub fn algo_name(&self, version: i32, height: u64) -> Option<&'static str> {
        self.algo_at(version, height).map(|a| a.name)
    }

    /// Hash `data` with the function the given header version selects at
    /// the given height.
    pub fn pow_hash(&self, version: i32, height: u64, data: &[u8]) -> Result<Hash, ForkError> {
        let algo = self
            .algo_at(version, height)
            .ok_or(ForkError::UnknownAlgorithm(version, height))?;
        Ok((algo.hash)(data))
    }

    /// Whether a difficulty map covers exactly the algorithm set of the
    /// epoch the given height falls into.
    pub fn matches_algo_set(&self, bits: &TargetBits, height: u64) -> bool {
        let algos = self.algos_at(height);
        bits.len() == algos.len() && algos.iter().all(|a| bits.contains_key(&a.version))
    }

    /// The height used for subsidy calculation when building the coinbase
    /// set for `next_height`. At the activation block itself the subsidy is
    /// taken one block ahead, so that miners at the boundary already bid
    /// for the post-fork reward.
    pub fn subsidy_height(&self, next_height: u64) -> u64 {
        if next_height == self.activation_height() {
            next_height + 1
        } else {
            next_height
        }
    }
}
