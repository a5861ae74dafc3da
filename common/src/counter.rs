use rand::Rng;

use crate::config::ROUNDS_PER_ALGO;

/// Rolling algorithm counter.
///
/// The active version is `algos[(position / rounds_per_algo) % len]`, so a
/// worker does equal work on every algorithm over any window of
/// `len * rounds_per_algo` rounds. The start position is randomized so
/// multiple workers on one host do not hash the same versions in lockstep.
///
/// Owned exclusively by the mining thread; nothing here is shared.
pub struct Counter {
    position: i32,
    rounds_per_algo: i32,
    algos: Vec<i32>,
}

impl Counter {
    pub fn new(rounds_per_algo: i32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            position: rng.gen_range(1..=rounds_per_algo + 1),
            rounds_per_algo,
            algos: Vec::new(),
        }
    }

    /// The algorithm set arrives with the first job.
    pub fn set_algos(&mut self, algos: Vec<i32>) {
        if !algos.is_empty() {
            self.algos = algos;
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn rounds_per_algo(&self) -> i32 {
        self.rounds_per_algo
    }

    /// True exactly once per `rounds_per_algo` rounds; the worker emits a
    /// hashrate report on this boundary.
    pub fn at_round_boundary(&self) -> bool {
        self.position % self.rounds_per_algo == 0
    }

    /// Current version for this round, advancing the position. Returns
    /// `None` until the algorithm set is known.
    pub fn next_version(&mut self) -> Option<i32> {
        if self.rounds_per_algo < 1 || self.algos.is_empty() {
            return None;
        }
        let index = (self.position / self.rounds_per_algo) as usize % self.algos.len();
        let version = self.algos[index];
        self.position = self.position.wrapping_add(1);
        Some(version)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(ROUNDS_PER_ALGO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_no_algos_yields_none() {
        let mut counter = Counter::new(ROUNDS_PER_ALGO);
        assert_eq!(counter.next_version(), None);
    }

    #[test]
    fn test_fairness_over_full_windows() {
        let algos = vec![5, 6, 7, 8, 9, 10, 11, 12, 13];
        let mut counter = Counter::new(ROUNDS_PER_ALGO);
        counter.set_algos(algos.clone());

        // Any window of n * len * rounds_per_algo rounds selects every
        // algorithm for exactly n * rounds_per_algo rounds.
        for n in 1..=3 {
            let mut tally: HashMap<i32, u32> = HashMap::new();
            for _ in 0..algos.len() * ROUNDS_PER_ALGO as usize {
                let version = counter.next_version().unwrap();
                *tally.entry(version).or_default() += 1;
            }
            for algo in &algos {
                assert_eq!(
                    tally[algo],
                    ROUNDS_PER_ALGO as u32,
                    "window {} version {}",
                    n,
                    algo
                );
            }
        }
    }

    #[test]
    fn test_rotation_is_blockwise() {
        let mut counter = Counter::new(3);
        counter.set_algos(vec![1, 2]);
        // Align to a boundary first.
        while !counter.at_round_boundary() {
            counter.next_version().unwrap();
        }
        let run: Vec<i32> = (0..6).map(|_| counter.next_version().unwrap()).collect();
        // Three consecutive rounds per algorithm.
        assert_eq!(run[0], run[1]);
        assert_eq!(run[1], run[2]);
        assert_eq!(run[3], run[4]);
        assert_eq!(run[4], run[5]);
        assert_ne!(run[0], run[3]);
    }

    #[test]
    fn test_random_start_offsets_vary() {
        let offsets: Vec<i32> = (0..32).map(|_| Counter::new(ROUNDS_PER_ALGO).position()).collect();
        assert!(offsets.iter().any(|o| *o != offsets[0]));
    }
}
