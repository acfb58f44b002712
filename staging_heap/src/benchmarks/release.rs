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

use serde::Serialize;

use super::{Benchmark, ModuleOptions, Timer};
use crate::{
    modules::{fence::HostFence, memory_backend::MemoryBackendModule},
    StagingMemoryManager, COPY_ALIGNMENT,
};

#[derive(Serialize)]
pub struct ReleaseBenchmarkOptions {
    entry_count: usize,
    entry_size: usize,
    modules: ModuleOptions,
}

/// Latency of `release` for one signaled set with `entry_count` entries
pub struct ReleaseBenchmark<'a, B: MemoryBackendModule> {
    manager: &'a mut StagingMemoryManager<B, HostFence>,
    entry_count: usize,
}

impl<'a, B: MemoryBackendModule> ReleaseBenchmark<'a, B> {
    const ENTRY_SIZE: usize = 64;

    pub fn new(manager: &'a mut StagingMemoryManager<B, HostFence>, entry_count: usize) -> Self {
        Self {
            manager,
            entry_count,
        }
    }
}

impl<B: MemoryBackendModule> Benchmark<ReleaseBenchmarkOptions> for ReleaseBenchmark<'_, B> {
    #[inline]
    fn get_name(&self) -> &'static str {
        "release"
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        for _ in 0..self.entry_count {
            self.manager.request_space(Self::ENTRY_SIZE, COPY_ALIGNMENT).unwrap();
        }

        let fence = HostFence::new();
        self.manager.finalize(Some(fence.clone())).unwrap();
        fence.signal();

        let timer = T::start();

        let released = self.manager.release().unwrap();
        let res = timer.stop();

        assert_eq!(released, 1);

        res
    }

    #[inline]
    fn get_bench_options(&self) -> ReleaseBenchmarkOptions {
        ReleaseBenchmarkOptions {
            entry_count: self.entry_count,
            entry_size: Self::ENTRY_SIZE,
            modules: ModuleOptions::new(&*self.manager),
        }
    }
}
