//! Difficulty adjustment
//!
//! Each algorithm runs its own linear-weighted moving average (LWMA) over the
//! target difficulties and timestamps of its last `N` blocks. Recent solve
//! times weigh more, and each solve time is clamped to `[1, max_block_time]`
//! so manipulated timestamps cannot swing the target far.

use std::collections::VecDeque;

use crate::config::ConsensusConstants;
use crate::consensus::PowAlgorithm;

/// LWMA over `(timestamp, target_difficulty)` samples, oldest first
#[derive(Debug, Clone)]
pub struct LinearWeightedMovingAverage {
    samples: VecDeque<(u64, u64)>,
    block_window: usize,
    target_time: u64,
    max_block_time: u64,
}

impl LinearWeightedMovingAverage {
    pub fn new(block_window: usize, target_time: u64, max_block_time: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(block_window + 1),
            block_window,
            target_time,
            max_block_time,
        }
    }

    /// Append the newest sample, dropping the oldest beyond `N + 1`
    pub fn add(&mut self, timestamp: u64, target_difficulty: u64) {
        self.samples.push_back((timestamp, target_difficulty));
        while self.samples.len() > self.block_window + 1 {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Next target difficulty, or `None` with fewer than two samples
    pub fn get_difficulty(&self) -> Option<u64> {
        if self.samples.len() < 2 {
            return None;
        }
        let n = (self.samples.len() - 1) as u128;
        let difficulty_sum: u128 = self
            .samples
            .iter()
            .skip(1)
            .map(|(_, difficulty)| u128::from(*difficulty))
            .sum();
        let ave_difficulty = difficulty_sum / n;

        let mut weighted_times: u128 = 0;
        let mut previous = self.samples[0].0;
        for (i, (timestamp, _)) in self.samples.iter().enumerate().skip(1) {
            // Out-of-order timestamps count as one second
            let this = if *timestamp > previous {
                *timestamp
            } else {
                previous + 1
            };
            let solve_time = (this - previous).min(self.max_block_time);
            previous = this;
            weighted_times += u128::from(solve_time) * i as u128;
        }

        // Sum of weights (1 + 2 + .. + n) times the target time
        let k = n * (n + 1) * u128::from(self.target_time) / 2;
        let target = ave_difficulty * k / weighted_times.max(1);
        u64::try_from(target).ok()
    }
}

/// Target difficulty for the next `algorithm` block.
///
/// `window` holds that algorithm's most recent `(timestamp, target_difficulty)`
/// samples, oldest first.
pub fn difficulty_target(
    algorithm: PowAlgorithm,
    window: &[(u64, u64)],
    constants: &ConsensusConstants,
) -> u64 {
    let mut lwma = LinearWeightedMovingAverage::new(
        constants.difficulty_window,
        constants.algorithm_target_time(algorithm),
        constants.max_block_time(),
    );
    for (timestamp, difficulty) in window {
        lwma.add(*timestamp, *difficulty);
    }
    lwma.get_difficulty()
        .unwrap_or_else(|| constants.initial_difficulty(algorithm))
        .max(constants.min_difficulty(algorithm))
}

/// Median of the given timestamps (mean of the middle two for even counts)
pub fn median_time_past(timestamps: &[u64]) -> u64 {
    if timestamps.is_empty() {
        return 0;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        ((u128::from(sorted[mid - 1]) + u128::from(sorted[mid])) / 2) as u64
    }
}
