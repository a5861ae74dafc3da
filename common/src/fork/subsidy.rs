// Block subsidy schedule. The chain engine owns consensus validation of
// subsidies; the controller only needs the same function to pre-fill the
// per-algorithm coinbase values.

use crate::{config::COIN, network::Network};

use super::Fork;

/// Base reward before halvings, in base units.
pub const BASE_SUBSIDY: i64 = 2 * COIN;

/// Halving interval in blocks.
pub const HALVING_INTERVAL: u64 = 250_000;

/// Subsidy for a block at `height` mined under `version`.
///
/// Before HF1 every algorithm pays the full halved base. From HF1 on the
/// base is divided by the algorithm's 1-based position in the epoch set, so
/// each algorithm carries its own reward and its own coinbase.
pub fn calc_block_subsidy(height: u64, network: Network, version: i32) -> i64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 63 {
        return 0;
    }
    let base = BASE_SUBSIDY >> halvings;

    let fork = Fork::new(network);
    if height < fork.activation_height() {
        return base;
    }

    match fork
        .algos_at(height)
        .iter()
        .position(|a| a.version == version)
    {
        Some(index) => base / (index as i64 + 1),
        // Unknown version: no reward rather than a bogus one.
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::HF1_MAINNET_HEIGHT;

    #[test]
    fn test_legacy_subsidy_uniform() {
        assert_eq!(calc_block_subsidy(1, Network::Mainnet, 2), BASE_SUBSIDY);
        assert_eq!(calc_block_subsidy(1, Network::Mainnet, 514), BASE_SUBSIDY);
    }

    #[test]
    fn test_halving() {
        // Version 5 is first in the post-fork set, so it pays the full
        // halved base.
        assert_eq!(
            calc_block_subsidy(HALVING_INTERVAL, Network::Testnet, 5),
            BASE_SUBSIDY >> 1
        );
        assert_eq!(
            calc_block_subsidy(2 * HALVING_INTERVAL, Network::Testnet, 5),
            BASE_SUBSIDY >> 2
        );
    }

    #[test]
    fn test_post_fork_subsidies_differ_per_algorithm() {
        let height = HF1_MAINNET_HEIGHT;
        let first = calc_block_subsidy(height, Network::Mainnet, 5);
        let second = calc_block_subsidy(height, Network::Mainnet, 6);
        assert!(first > second);
        assert_eq!(first, second * 2);
    }

    #[test]
    fn test_unknown_version_pays_nothing() {
        assert_eq!(calc_block_subsidy(HF1_MAINNET_HEIGHT, Network::Mainnet, 999), 0);
    }

    #[test]
    fn test_far_future_exhausted() {
        assert_eq!(calc_block_subsidy(63 * HALVING_INTERVAL, Network::Mainnet, 5), 0);
    }
}
