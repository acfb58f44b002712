/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

#[cfg(feature = "benchmarks")]
use serde::Serialize;

use crate::{range_allocator::DEFAULT_GRANULARITY, util::checked_round_up, StagingError, StagingResult};

/// Configuration of a `StagingMemoryManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "benchmarks", derive(Serialize))]
pub struct StagingConfig {
    /// Default capacity of new blocks. Bigger requests get a block of their own size.
    pub block_size: usize,

    /// Free blocks as soon as they become empty during a release.
    /// If disabled, empty blocks are kept for reuse until `free_unused` is called.
    pub free_on_release: bool,

    /// Block capacities are rounded up to a multiple of this, has to be a power of two
    pub granularity: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024 * 1024,
            free_on_release: true,
            granularity: DEFAULT_GRANULARITY,
        }
    }
}

impl StagingConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_free_on_release(mut self, free_on_release: bool) -> Self {
        self.free_on_release = free_on_release;
        self
    }

    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn validate(&self) -> StagingResult<()> {
        if self.block_size == 0 {
            return Err(StagingError::InvalidConfig("block size has to be greater than zero"));
        }

        if !self.granularity.is_power_of_two() {
            return Err(StagingError::InvalidConfig("granularity has to be a power of two"));
        }

        if checked_round_up(self.block_size, self.granularity).is_none() {
            return Err(StagingError::InvalidConfig(
                "block size overflows when rounded up to the granularity",
            ));
        }

        Ok(())
    }
}
