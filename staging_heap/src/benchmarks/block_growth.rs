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

use core::hint::black_box;

use serde::Serialize;

use super::{Benchmark, ModuleOptions, Timer};
use crate::{
    modules::{fence::HostFence, memory_backend::MemoryBackendModule},
    StagingMemoryManager, COPY_ALIGNMENT,
};

#[derive(Serialize)]
pub struct BlockGrowthBenchmarkOptions {
    object_size: usize,
    modules: ModuleOptions,
}

/// Latency of `request_space` if a new block has to be created for it
pub struct BlockGrowthBenchmark<'a, B: MemoryBackendModule> {
    manager: &'a mut StagingMemoryManager<B, HostFence>,
    size: usize,
}

impl<'a, B: MemoryBackendModule> BlockGrowthBenchmark<'a, B> {
    pub fn new(manager: &'a mut StagingMemoryManager<B, HostFence>, size: usize) -> Self {
        assert!(
            size >= manager.blocks().block_size(),
            "every request has to need a block of its own"
        );
        assert!(manager.free_on_release());

        Self { manager, size }
    }
}

impl<B: MemoryBackendModule> Benchmark<BlockGrowthBenchmarkOptions> for BlockGrowthBenchmark<'_, B> {
    #[inline]
    fn get_name(&self) -> &'static str {
        "block_growth"
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        assert_eq!(self.manager.blocks().block_count(), 0);

        let timer = T::start();

        black_box(self.manager.request_space(self.size, COPY_ALIGNMENT)).unwrap();
        let res = timer.stop();

        // retires the block again
        self.manager.finalize(None).unwrap();
        self.manager.release().unwrap();

        res
    }

    #[inline]
    fn get_bench_options(&self) -> BlockGrowthBenchmarkOptions {
        BlockGrowthBenchmarkOptions {
            object_size: self.size,
            modules: ModuleOptions::new(&*self.manager),
        }
    }
}
