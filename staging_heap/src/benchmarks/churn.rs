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

use std::collections::VecDeque;

use rand_xoshiro::{
    rand_core::{RngCore, SeedableRng},
    Xoshiro128StarStar,
};
use serde::Serialize;

use super::{Benchmark, ModuleOptions, Timer};
use crate::{
    modules::{fence::HostFence, memory_backend::MemoryBackendModule},
    StagingMemoryManager,
};

#[derive(Serialize)]
pub struct ChurnBenchmarkOptions {
    iterations: usize,
    frames_in_flight: usize,
    max_request_size: usize,
    modules: ModuleOptions,
}

/// Simulates a frame loop: every iteration requests a few randomly sized
/// ranges, finalizes them with a fence and signals the fence that is
/// `frames_in_flight` iterations old.
pub struct ChurnBenchmark<'a, B: MemoryBackendModule> {
    manager: &'a mut StagingMemoryManager<B, HostFence>,
    iterations: usize,
    frames_in_flight: usize,
    rng: Xoshiro128StarStar,
}

impl<'a, B: MemoryBackendModule> ChurnBenchmark<'a, B> {
    const MAX_REQUEST_SIZE: usize = 64 * 1024;
    const MAX_REQUESTS_PER_FRAME: u32 = 8;

    pub fn new(
        manager: &'a mut StagingMemoryManager<B, HostFence>,
        iterations: usize,
        frames_in_flight: usize,
    ) -> Self {
        const SEED: [u8; 16] = [
            93, 12, 201, 77, 140, 3, 58, 219, 164, 36, 250, 117, 9, 188, 71, 45,
        ];

        Self {
            manager,
            iterations,
            frames_in_flight,
            rng: Xoshiro128StarStar::from_seed(SEED),
        }
    }
}

impl<B: MemoryBackendModule> Benchmark<ChurnBenchmarkOptions> for ChurnBenchmark<'_, B> {
    #[inline]
    fn get_name(&self) -> &'static str {
        "churn"
    }

    #[inline]
    fn execute<T: Timer>(&mut self) -> u32 {
        let mut in_flight: VecDeque<HostFence> = VecDeque::with_capacity(self.frames_in_flight + 1);

        let timer = T::start();

        for _ in 0..self.iterations {
            let requests = self.rng.next_u32() % Self::MAX_REQUESTS_PER_FRAME + 1;
            for _ in 0..requests {
                let size = (self.rng.next_u32() as usize % Self::MAX_REQUEST_SIZE) + 1;
                let align = 1 << (self.rng.next_u32() % 9);
                self.manager.request_space(size, align).unwrap();
            }

            let fence = HostFence::new();
            self.manager.finalize(Some(fence.clone())).unwrap();
            in_flight.push_back(fence);

            if in_flight.len() > self.frames_in_flight {
                if let Some(fence) = in_flight.pop_front() {
                    fence.signal();
                }
            }

            self.manager.release().unwrap();
        }

        for fence in in_flight.drain(..) {
            fence.signal();
        }
        self.manager.release().unwrap();

        let res = timer.stop();

        assert_eq!(self.manager.utilization().used_bytes, 0);

        res
    }

    #[inline]
    fn get_bench_options(&self) -> ChurnBenchmarkOptions {
        ChurnBenchmarkOptions {
            iterations: self.iterations,
            frames_in_flight: self.frames_in_flight,
            max_request_size: Self::MAX_REQUEST_SIZE,
            modules: ModuleOptions::new(&*self.manager),
        }
    }
}
