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

use crate::{
    modules::{fence::HostFence, memory_backend::HeapMemoryBackend},
    StagingConfig, StagingMemoryManager,
};

#[cfg(feature = "benchmarks")]
mod benchmarks;
mod fence_gating;

pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn get_test_manager(
    block_size: usize,
    free_on_release: bool,
) -> StagingMemoryManager<HeapMemoryBackend, HostFence> {
    init_test_logger();

    StagingMemoryManager::new(
        HeapMemoryBackend::new(),
        StagingConfig::default()
            .with_block_size(block_size)
            .with_free_on_release(free_on_release),
    )
    .unwrap()
}
