//! Block reward schedule
//!
//! Each block mints a fixed fraction of the supply not yet issued, so the
//! reward decays smoothly towards zero. Once that falls below the tail
//! emission, every block mints the tail amount forever.

use serde::{Deserialize, Serialize};

/// Denominator for `decay_ppm`
const PARTS_PER_MILLION: u128 = 1_000_000;

/// Deterministic emission curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionSchedule {
    /// Supply issued by the decaying part of the curve
    pub decaying_supply: u64,
    /// Share of the remaining decaying supply minted per block, in ppm
    pub decay_ppm: u64,
    /// Minimum reward per block
    pub tail_emission: u64,
}

impl EmissionSchedule {
    pub const fn new(decaying_supply: u64, decay_ppm: u64, tail_emission: u64) -> Self {
        Self {
            decaying_supply,
            decay_ppm,
            tail_emission,
        }
    }

    /// Reward for the block at `height` given everything issued before it.
    ///
    /// The genesis block mints nothing.
    pub fn block_reward(&self, height: u64, total_issued: u64) -> u64 {
        if height == 0 {
            return 0;
        }
        let remaining = self.decaying_supply.saturating_sub(total_issued);
        let reward = (remaining as u128 * self.decay_ppm as u128) / PARTS_PER_MILLION;
        (reward as u64).max(self.tail_emission)
    }

    /// Total issued by blocks `0..=height`
    pub fn supply_at_height(&self, height: u64) -> u64 {
        self.iter().take(height as usize + 1).last().map(|(_, s)| s).unwrap_or(0)
    }

    /// `(reward, supply after the block)` for every height from genesis
    pub fn iter(&self) -> EmissionIter {
        EmissionIter {
            schedule: *self,
            height: 0,
            supply: 0,
        }
    }
}

/// Iterator over the emission curve
pub struct EmissionIter {
    schedule: EmissionSchedule,
    height: u64,
    supply: u64,
}

impl Iterator for EmissionIter {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let reward = self.schedule.block_reward(self.height, self.supply);
        self.supply = self.supply.checked_add(reward)?;
        self.height += 1;
        Some((reward, self.supply))
    }
}
