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

use core::any::type_name;

#[cfg(not(test))]
use std::io::stdout;

use serde::Serialize;

mod block_growth;
mod churn;
mod release;
mod request_space;

pub use block_growth::*;
pub use churn::*;
pub use release::*;
pub use request_space::*;

use crate::{
    modules::{
        fence::{FenceModule, HostFence},
        memory_backend::MemoryBackendModule,
    },
    StagingConfig, StagingMemoryManager,
};

pub struct RunAllBenchmarkOptions {
    pub run_request_space_benchmarks: bool,
    pub run_block_growth_benchmarks: bool,
    pub run_release_benchmarks: bool,
    pub run_churn_benchmarks: bool,
}

impl Default for RunAllBenchmarkOptions {
    fn default() -> Self {
        Self {
            run_request_space_benchmarks: false,
            run_block_growth_benchmarks: false,
            run_release_benchmarks: false,
            run_churn_benchmarks: false,
        }
    }
}

impl RunAllBenchmarkOptions {
    pub fn all() -> Self {
        Self {
            run_request_space_benchmarks: true,
            run_block_growth_benchmarks: true,
            run_release_benchmarks: true,
            run_churn_benchmarks: true,
        }
    }
}

/// Request sizes used by the size dependent benchmarks
pub const BENCH_SIZES: [usize; 6] = [16, 64, 256, 1024, 4096, 16384];

/// Entry counts used by the release benchmark
pub const BENCH_ENTRY_COUNTS: [usize; 4] = [1, 8, 64, 256];

const BENCH_BLOCK_SIZE: usize = 1024 * 1024;

fn get_bench_manager<B: MemoryBackendModule>(
    backend: B,
    config: StagingConfig,
) -> StagingMemoryManager<B, HostFence> {
    StagingMemoryManager::new(backend, config).unwrap()
}

pub fn run_all_benchmarks<TIMER: Timer, B: MemoryBackendModule, F: Fn() -> B>(
    get_backend: F,
    mut run_options: BenchmarkRunOptions,
    options: RunAllBenchmarkOptions,
) {
    let mut curr_iteration = 0usize;
    let mut iteration_count = 0;

    if options.run_request_space_benchmarks {
        iteration_count += BENCH_SIZES.len();
    }
    if options.run_block_growth_benchmarks {
        iteration_count += BENCH_SIZES.len();
    }
    if options.run_release_benchmarks {
        iteration_count += BENCH_ENTRY_COUNTS.len();
    }
    if options.run_churn_benchmarks {
        iteration_count += 1;
    }

    fn handle_curr_iteration(curr_iteration: &mut usize, iteration_count: usize) {
        let percentage = (100 * *curr_iteration) / (iteration_count);
        print!("[{}%] ", percentage);

        *curr_iteration += 1;
    }

    if options.run_request_space_benchmarks {
        for size in BENCH_SIZES {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let config = StagingConfig::default()
                .with_block_size(BENCH_BLOCK_SIZE)
                .with_free_on_release(false);
            let mut manager = get_bench_manager(get_backend(), config);
            let bench = RequestSpaceBenchmark::new(&mut manager, size);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
    }

    if options.run_block_growth_benchmarks {
        for size in BENCH_SIZES {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            // every request is bigger than the default block size
            let config = StagingConfig::default()
                .with_block_size(1)
                .with_granularity(16)
                .with_free_on_release(true);
            let mut manager = get_bench_manager(get_backend(), config);
            let bench = BlockGrowthBenchmark::new(&mut manager, size);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
    }

    if options.run_release_benchmarks {
        for entry_count in BENCH_ENTRY_COUNTS {
            handle_curr_iteration(&mut curr_iteration, iteration_count);
            let config = StagingConfig::default()
                .with_block_size(BENCH_BLOCK_SIZE)
                .with_free_on_release(false);
            let mut manager = get_bench_manager(get_backend(), config);
            let bench = ReleaseBenchmark::new(&mut manager, entry_count);
            bench.run_benchmark::<TIMER>(&mut run_options);
        }
    }

    if options.run_churn_benchmarks {
        handle_curr_iteration(&mut curr_iteration, iteration_count);
        let config = StagingConfig::default().with_block_size(BENCH_BLOCK_SIZE);
        let mut manager = get_bench_manager(get_backend(), config);
        let bench = ChurnBenchmark::new(&mut manager, 1000, 8);
        bench.run_benchmark::<TIMER>(&mut run_options);
    }
}

pub trait Benchmark<O: Serialize> {
    fn get_name(&self) -> &'static str;

    fn get_bench_options(&self) -> O;

    fn execute<T: Timer>(&mut self) -> u32;

    #[inline(never)]
    fn run_benchmark<T: Timer>(mut self, options: &mut BenchmarkRunOptions) -> BenchmarkRunResult
    where
        Self: Sized,
    {
        assert_eq!(options.repetitions as usize, options.result_buffer.len());

        print!("Running Benchmark \"{}\" with options ", self.get_name());

        #[cfg(not(test))]
        serde_json::to_writer(stdout(), &self.get_bench_options()).unwrap();
        println!();

        for _ in 0..options.cold_start {
            self.execute::<T>();
        }

        for i in 0..options.result_buffer.len() {
            let res = self.execute::<T>();
            options.result_buffer[i] = res;
        }

        print!("[BENCH-INFO] ");

        #[cfg(not(test))]
        {
            let run_info = BenchmarkRunInfo {
                bench_name: self.get_name(),
                bench_options: &self.get_bench_options(),
                machine_name: options.machine_name,
                cold_start: options.cold_start,
                repetitions: options.repetitions,
                ticks_per_ms: T::get_ticks_per_ms(),
                data: &options.result_buffer,
            };
            serde_json::to_writer(stdout(), &run_info).unwrap();
        }
        println!();

        let res = BenchmarkRunResult::from_buffer(&options.result_buffer);
        println!(
            "-> Finished {}: mean={}, min={}, max={}",
            self.get_name(),
            res.mean_latency,
            res.min_latency,
            res.max_latency
        );
        println!();

        res
    }
}

pub struct BenchmarkRunOptions<'a> {
    pub repetitions: u32,
    pub result_buffer: &'a mut [u32],

    pub cold_start: u32,

    pub machine_name: &'static str,
}

#[derive(Serialize)]
pub struct ModuleOptions {
    backend: &'static str,
    fence: &'static str,
    config: StagingConfig,
}

impl ModuleOptions {
    pub fn new<B: MemoryBackendModule, F: FenceModule>(manager: &StagingMemoryManager<B, F>) -> Self {
        Self {
            backend: type_name::<B>(),
            fence: type_name::<F>(),
            config: StagingConfig {
                block_size: manager.blocks().block_size(),
                free_on_release: manager.free_on_release(),
                granularity: manager.blocks().granularity(),
            },
        }
    }
}

#[derive(Serialize)]
pub struct BenchmarkRunInfo<'a, O: Serialize> {
    bench_name: &'static str,
    bench_options: &'a O,
    machine_name: &'static str,
    cold_start: u32,
    repetitions: u32,
    ticks_per_ms: u32,
    data: &'a [u32],
}

pub struct BenchmarkRunResult {
    pub mean_latency: u32,
    pub min_latency: u32,
    pub max_latency: u32,
}

impl BenchmarkRunResult {
    fn from_buffer(buffer: &[u32]) -> Self {
        Self {
            mean_latency: buffer.iter().map(|x| *x).sum::<u32>() / (buffer.len() as u32),
            min_latency: buffer.iter().min().map(|x| *x).unwrap(),
            max_latency: buffer.iter().max().map(|x| *x).unwrap(),
        }
    }
}

pub trait Timer {
    fn get_ticks_per_ms() -> u32;

    fn start() -> Self;

    fn stop(self) -> u32;
}
