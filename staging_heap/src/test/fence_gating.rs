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

use rand::{rngs::SmallRng, RngCore, SeedableRng};

use super::get_test_manager;
use crate::{
    modules::{
        fence::{FenceModule, HostFence},
        memory_backend::HeapMemoryBackend,
    },
    BlockHandle, SetHandle, StagingMemoryManager, StagingSpace,
};

const SEED: u64 = 5446535461589659585;

type TestManager = StagingMemoryManager<HeapMemoryBackend, HostFence>;

/// Ranges of live entries per block must never overlap
fn check_no_overlap(manager: &TestManager) {
    let mut ranges: Vec<(BlockHandle, usize, usize)> = manager
        .sets()
        .iter()
        .flat_map(|set| set.entries().iter())
        .map(|entry| (entry.block, entry.offset, entry.size))
        .collect();

    ranges.sort_by_key(|(block, offset, _)| (block.index(), *offset));

    for pair in ranges.windows(2) {
        let (block_a, offset_a, size_a) = pair[0];
        let (block_b, offset_b, _) = pair[1];
        if block_a == block_b {
            assert!(offset_a + size_a <= offset_b, "entries overlap: {:?}", pair);
        }
    }

    let entry_bytes: usize = ranges.iter().map(|(_, _, size)| *size).sum();
    assert_eq!(entry_bytes, manager.utilization().used_bytes);
}

#[test]
fn test_fence_gating_random() {
    let mut manager = get_test_manager(16 * 1024, false);
    let mut rand = SmallRng::seed_from_u64(SEED);

    let mut in_flight: VecDeque<(HostFence, SetHandle, Vec<(StagingSpace<_>, u8)>)> = VecDeque::new();

    for frame in 0..200usize {
        let mut spaces = Vec::new();
        let requests = rand.next_u32() % 6;
        for _ in 0..requests {
            let size = (rand.next_u32() % 6000) as usize + 1;
            let align = 1usize << (rand.next_u32() % 8);
            let space = manager.request_space(size, align).unwrap();
            assert_eq!(space.offset % align, 0);

            let fill = frame as u8;
            manager.mapped_mut(&space).unwrap().fill(fill);
            spaces.push((space, fill));
        }

        let fence = HostFence::new();
        match manager.finalize(Some(fence.clone())).unwrap() {
            Some(handle) => in_flight.push_back((fence, handle, spaces)),
            None => assert!(spaces.is_empty()),
        }

        // signal a random number of the oldest fences
        let signals = rand.next_u32() % 3;
        for (fence, _, _) in in_flight.iter().take(signals as usize) {
            fence.signal();
        }

        manager.release().unwrap();

        // sets with a pending fence keep their data
        in_flight.retain(|(fence, handle, spaces)| {
            if fence.is_signaled() {
                assert!(!manager.sets().contains(*handle));
                false
            } else {
                assert!(manager.sets().contains(*handle));
                for (space, fill) in spaces {
                    assert!(manager.mapped(space).unwrap().iter().all(|byte| byte == fill));
                }
                true
            }
        });

        check_no_overlap(&manager);
    }

    for (fence, _, _) in in_flight.drain(..) {
        fence.signal();
    }
    manager.release().unwrap();

    assert_eq!(manager.utilization().used_bytes, 0);
    assert_eq!(manager.pending_set_count(), 0);
    manager.deinit().unwrap();
    assert_eq!(manager.backend().live_allocations(), 0);
}
