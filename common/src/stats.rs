//! Hashrate accounting: a fixed-capacity ring of cumulative hash counts
//! whose adjacent differences feed an exponentially weighted moving
//! average.

use crate::config::{EWMA_WINDOW, SAMPLE_RING_SIZE};

/// Ring of cumulative hash-count samples, one pushed per sample tick.
pub struct SampleRing {
    buf: Vec<u64>,
    cursor: usize,
    len: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            cursor: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: u64) {
        self.buf[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.buf.len();
        if self.len < self.buf.len() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Samples in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        let start = if self.len < self.buf.len() {
            0
        } else {
            self.cursor
        };
        (0..self.len).map(move |i| self.buf[(start + i) % self.buf.len()])
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(SAMPLE_RING_SIZE)
    }
}

/// Moving average over the last `window` samples: plain mean during warmup,
/// exponential decay with alpha = 2 / (window + 1) after.
pub struct Ewma {
    window: usize,
    count: usize,
    value: f64,
}

impl Ewma {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            count: 0,
            value: 0.0,
        }
    }

    pub fn add(&mut self, sample: f64) {
        self.count += 1;
        if self.count <= self.window {
            // Warmup: cumulative mean until enough samples arrived.
            self.value += (sample - self.value) / self.count as f64;
        } else {
            let alpha = 2.0 / (self.window as f64 + 1.0);
            self.value = alpha * sample + (1.0 - alpha) * self.value;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Hashrate estimate from a ring of cumulative counts: feed the adjacent
/// differences into a windowed EWMA. With one sample per second the result
/// is hashes per second.
pub fn hashrate_from_samples(ring: &SampleRing) -> f64 {
    let mut average = Ewma::new(EWMA_WINDOW);
    let mut prev: Option<u64> = None;
    for sample in ring.iter() {
        if let Some(p) = prev {
            average.add(sample.saturating_sub(p) as f64);
        }
        prev = Some(sample);
    }
    average.value()
}
