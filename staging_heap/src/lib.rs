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

mod block_pool;
mod error;
mod range_allocator;
mod shared_staging_memory_manager;
mod staging_config;
mod staging_memory_manager;
mod staging_set;
mod util;

#[cfg(test)]
mod test;

#[cfg(feature = "benchmarks")]
pub mod benchmarks;

pub use block_pool::{Block, BlockHandle, BlockPool, Utilization};
pub use error::{StagingError, StagingResult};
pub use range_allocator::{aligned_size, FreeRange, RangeAllocator, SubAllocation, DEFAULT_GRANULARITY};
pub use shared_staging_memory_manager::SharedStagingMemoryManager;
pub use staging_config::StagingConfig;
pub use staging_memory_manager::{StagingMemoryManager, StagingSpace, COPY_ALIGNMENT};
pub use staging_set::{Entry, SetHandle, StagingSet, StagingSetPool};
pub mod modules;
