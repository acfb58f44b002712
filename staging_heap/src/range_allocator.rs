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

use core::cmp::max;

use log::trace;
use static_assertions::const_assert;

use crate::{
    util::{checked_round_up, padding_needed_for, round_up_to_nearest},
    StagingError, StagingResult,
};

/// Default granularity that block capacities are rounded up to
pub const DEFAULT_GRANULARITY: usize = 256;

const_assert!(DEFAULT_GRANULARITY.is_power_of_two());

/// Rounds `size` up to a multiple of `granularity`. Zero sized requests
/// still occupy one granule.
pub fn aligned_size(size: usize, granularity: usize) -> usize {
    round_up_to_nearest(max(size, 1), granularity)
}

/// A free byte range `[offset, offset + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    pub offset: usize,
    pub size: usize,
}

impl FreeRange {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Result of a successful `sub_allocate`.
///
/// `offset` is the aligned offset the caller may write to. The interval
/// `[consumed_offset, consumed_offset + consumed_size)` is what was taken from
/// the free list (alignment padding included) and is what has to be passed
/// to `sub_free` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    pub offset: usize,
    pub consumed_offset: usize,
    pub consumed_size: usize,
}

impl SubAllocation {
    pub fn padding(&self) -> usize {
        self.offset - self.consumed_offset
    }
}

/// First fit range allocator for one fixed-capacity arena.
///
/// Free ranges are kept sorted by offset, disjoint and coalesced. Used ranges
/// are not stored at all: whoever allocated a range has to remember it.
pub struct RangeAllocator {
    capacity: usize,
    granularity: usize,
    free_ranges: Vec<FreeRange>,
}

impl RangeAllocator {
    /// Creates an allocator with one free range `[0, capacity)`
    pub fn new(capacity: usize) -> Self {
        Self::with_granularity(capacity, DEFAULT_GRANULARITY)
    }

    pub fn with_granularity(capacity: usize, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two(), "granularity has to be a power of two");

        let free_ranges = if capacity > 0 {
            vec![FreeRange {
                offset: 0,
                size: capacity,
            }]
        } else {
            vec![]
        };

        Self {
            capacity,
            granularity,
            free_ranges,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Rounds `size` up to this allocator's granularity
    pub fn aligned_size(&self, size: usize) -> usize {
        aligned_size(size, self.granularity)
    }

    /// Searches for the first free range that fits `size` bytes at `align`.
    ///
    /// Returns the index of the range, the aligned offset and the number of
    /// bytes this request consumes from the start of the range.
    fn find_fit(&self, size: usize, align: usize) -> Option<(usize, usize, usize)> {
        debug_assert!(align.is_power_of_two(), "alignment has to be a power of two");

        let rounded_size = checked_round_up(max(size, 1), align)?;

        self.free_ranges
            .iter()
            .enumerate()
            .find_map(|(index, range)| {
                let padding = padding_needed_for(range.offset, align);
                let consumed = rounded_size.checked_add(padding)?;

                if consumed <= range.size {
                    Some((index, range.offset + padding, consumed))
                } else {
                    None
                }
            })
    }

    /// Returns `true` if `sub_allocate(size, align)` would succeed
    pub fn is_available(&self, size: usize, align: usize) -> bool {
        self.find_fit(size, align).is_some()
    }

    /// Takes `size` bytes aligned to `align` out of the first free range that fits.
    ///
    /// The consumed size is `size` rounded up to `align` plus the padding
    /// that was needed to align the start. Returns `None` if no free range fits.
    pub fn sub_allocate(&mut self, size: usize, align: usize) -> Option<SubAllocation> {
        let (index, offset, consumed_size) = self.find_fit(size, align)?;

        let range = &mut self.free_ranges[index];
        let consumed_offset = range.offset;

        if consumed_size == range.size {
            self.free_ranges.remove(index);
        } else {
            range.offset += consumed_size;
            range.size -= consumed_size;
        }

        trace!(
            "sub_allocate(size={}, align={}) -> offset={}, consumed=[{}, {})",
            size,
            align,
            offset,
            consumed_offset,
            consumed_offset + consumed_size
        );

        Some(SubAllocation {
            offset,
            consumed_offset,
            consumed_size,
        })
    }

    /// Puts `[offset, offset + size)` back into the free list and merges it
    /// with its neighbours.
    ///
    /// Fails if the range leaves the arena or overlaps memory that is already free.
    pub fn sub_free(&mut self, offset: usize, size: usize) -> StagingResult<()> {
        let invalid = StagingError::InvalidRange { offset, size };

        let end = offset.checked_add(size).ok_or(invalid.clone())?;
        if size == 0 || end > self.capacity {
            return Err(invalid);
        }

        // first range that starts at or after `offset`
        let index = self.free_ranges.partition_point(|range| range.offset < offset);

        let merge_left = match index.checked_sub(1).map(|i| self.free_ranges[i]) {
            Some(prev) if prev.end() > offset => return Err(invalid),
            Some(prev) => prev.end() == offset,
            None => false,
        };

        let merge_right = match self.free_ranges.get(index) {
            Some(next) if end > next.offset => return Err(invalid),
            Some(next) => next.offset == end,
            None => false,
        };

        match (merge_left, merge_right) {
            (true, true) => {
                let next = self.free_ranges.remove(index);
                self.free_ranges[index - 1].size += size + next.size;
            }
            (true, false) => {
                self.free_ranges[index - 1].size += size;
            }
            (false, true) => {
                let next = &mut self.free_ranges[index];
                next.offset = offset;
                next.size += size;
            }
            (false, false) => {
                self.free_ranges.insert(index, FreeRange { offset, size });
            }
        }

        trace!("sub_free(offset={}, size={})", offset, size);

        Ok(())
    }

    /// Returns `true` if nothing is allocated
    pub fn is_empty(&self) -> bool {
        match self.free_ranges.as_slice() {
            [single] => single.offset == 0 && single.size == self.capacity,
            [] => self.capacity == 0,
            _ => false,
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.free_ranges.iter().map(|range| range.size).sum()
    }

    pub fn used_bytes(&self) -> usize {
        self.capacity - self.free_bytes()
    }

    /// Free ranges sorted by offset
    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free_ranges
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::SmallRng, RngCore, SeedableRng};

    use super::{FreeRange, RangeAllocator, SubAllocation};
    use crate::StagingError;

    /// checks that the free list is sorted, coalesced and inside of the arena
    fn check_free_list(allocator: &RangeAllocator) {
        let ranges = allocator.free_ranges();
        for range in ranges {
            assert!(range.size > 0, "empty free range {:?}", range);
            assert!(range.end() <= allocator.capacity());
        }

        for pair in ranges.windows(2) {
            assert!(
                pair[0].end() < pair[1].offset,
                "free ranges are not sorted or not coalesced: {:?}",
                ranges
            );
        }
    }

    fn check_integrity(allocator: &RangeAllocator, allocations: &Vec<SubAllocation>) {
        check_free_list(allocator);

        let used: usize = allocations.iter().map(|a| a.consumed_size).sum();
        assert_eq!(allocator.free_bytes() + used, allocator.capacity());

        for (i, a) in allocations.iter().enumerate() {
            for (j, b) in allocations.iter().enumerate() {
                if i == j {
                    continue;
                }

                assert!(
                    (a.consumed_offset + a.consumed_size <= b.consumed_offset)
                        || (b.consumed_offset + b.consumed_size <= a.consumed_offset),
                    "allocated regions should not overlap"
                );
            }

            for range in allocator.free_ranges() {
                assert!(
                    (a.consumed_offset + a.consumed_size <= range.offset)
                        || (range.end() <= a.consumed_offset),
                    "allocated region overlaps free range"
                );
            }
        }
    }

    #[test]
    fn test_range_allocator_simple() {
        let mut allocator = RangeAllocator::new(1024);
        assert!(allocator.is_empty());
        assert_eq!(allocator.free_bytes(), 1024);

        let a = allocator.sub_allocate(300, 16).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(a.consumed_size, 304);

        let b = allocator.sub_allocate(300, 16).unwrap();
        assert_eq!(b.offset, 304);
        assert_eq!(b.consumed_size, 304);

        assert!(!allocator.is_empty());
        assert_eq!(allocator.used_bytes(), 608);

        // does not fit anymore
        assert!(!allocator.is_available(500, 16));
        assert!(allocator.sub_allocate(500, 16).is_none());
        assert!(allocator.is_available(400, 16));

        allocator.sub_free(a.consumed_offset, a.consumed_size).unwrap();
        allocator.sub_free(b.consumed_offset, b.consumed_size).unwrap();

        assert!(allocator.is_empty());
        assert_eq!(
            allocator.free_ranges(),
            &[FreeRange {
                offset: 0,
                size: 1024
            }]
        );
    }

    #[test]
    fn test_range_allocator_alignment_padding() {
        let mut allocator = RangeAllocator::new(4096);

        let a = allocator.sub_allocate(10, 4).unwrap();
        assert_eq!((a.offset, a.consumed_size), (0, 12));

        // next free range starts at 12, aligning to 256 needs 244 bytes of padding
        let b = allocator.sub_allocate(100, 256).unwrap();
        assert_eq!(b.offset, 256);
        assert_eq!(b.consumed_offset, 12);
        assert_eq!(b.padding(), 244);
        assert_eq!(b.consumed_size, 244 + 256);
        assert_eq!(b.offset % 256, 0);

        check_integrity(&allocator, &vec![a, b]);

        allocator.sub_free(b.consumed_offset, b.consumed_size).unwrap();
        allocator.sub_free(a.consumed_offset, a.consumed_size).unwrap();
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_range_allocator_zero_size() {
        let mut allocator = RangeAllocator::new(64);
        let a = allocator.sub_allocate(0, 8).unwrap();
        assert_eq!(a.consumed_size, 8);

        allocator.sub_free(a.consumed_offset, a.consumed_size).unwrap();
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_range_allocator_coalescing() {
        let mut allocator = RangeAllocator::new(64 * 4);
        let regions: Vec<SubAllocation> = (0..4).map(|_| allocator.sub_allocate(64, 64).unwrap()).collect();
        assert!(allocator.free_ranges().is_empty());

        // no neighbours
        allocator.sub_free(regions[1].consumed_offset, 64).unwrap();
        assert_eq!(allocator.free_ranges().len(), 1);

        // [2] is still in use, so no neighbours either
        allocator.sub_free(regions[3].consumed_offset, 64).unwrap();
        assert_eq!(allocator.free_ranges().len(), 2);

        // merge left and right at once
        allocator.sub_free(regions[2].consumed_offset, 64).unwrap();
        assert_eq!(
            allocator.free_ranges(),
            &[FreeRange {
                offset: 64,
                size: 192
            }]
        );

        // merge right into the range starting at 64
        allocator.sub_free(regions[0].consumed_offset, 64).unwrap();
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_range_allocator_invalid_free() {
        let mut allocator = RangeAllocator::new(1024);
        let a = allocator.sub_allocate(128, 16).unwrap();

        // already free
        assert_eq!(
            allocator.sub_free(512, 16),
            Err(StagingError::InvalidRange {
                offset: 512,
                size: 16
            })
        );

        // overlaps the free range to the right
        assert!(allocator.sub_free(64, 128).is_err());

        // outside of the arena
        assert!(allocator.sub_free(1000, 100).is_err());
        assert!(allocator.sub_free(usize::MAX, 2).is_err());
        assert!(allocator.sub_free(0, 0).is_err());

        allocator.sub_free(a.consumed_offset, a.consumed_size).unwrap();

        // double free
        assert!(allocator.sub_free(a.consumed_offset, a.consumed_size).is_err());
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_range_allocator_aligned_size() {
        let allocator = RangeAllocator::new(1024);
        assert_eq!(allocator.aligned_size(0), 256);
        assert_eq!(allocator.aligned_size(1), 256);
        assert_eq!(allocator.aligned_size(256), 256);
        assert_eq!(allocator.aligned_size(2048), 2048);
        assert_eq!(allocator.aligned_size(2049), 2304);

        let allocator = RangeAllocator::with_granularity(1024, 64);
        assert_eq!(allocator.aligned_size(65), 128);
    }

    #[test]
    fn test_range_allocator_exact_fit() {
        let mut allocator = RangeAllocator::new(1024);
        let a = allocator.sub_allocate(1024, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert!(allocator.free_ranges().is_empty());
        assert!(!allocator.is_available(1, 1));

        allocator.sub_free(0, 1024).unwrap();
        assert!(allocator.is_empty());

        // never hands out more than the capacity
        assert!(allocator.sub_allocate(1025, 1).is_none());
        assert!(allocator.sub_allocate(usize::MAX, 16).is_none());
    }

    #[test]
    fn test_range_allocator_random_churn() {
        const SEED: u64 = 5446535461589659585;
        const CAPACITY: usize = 64 * 1024;

        let mut rand = SmallRng::seed_from_u64(SEED);
        let mut allocator = RangeAllocator::new(CAPACITY);
        let mut allocations: Vec<SubAllocation> = vec![];

        for iteration in 0..2000 {
            let allocate = allocations.is_empty() || rand.next_u32() % 3 != 0;

            if allocate {
                let size = (rand.next_u32() % 2000) as usize;
                let align = 1 << (rand.next_u32() % 9);
                let available = allocator.is_available(size, align);

                match allocator.sub_allocate(size, align) {
                    Some(allocation) => {
                        assert!(available);
                        assert_eq!(allocation.offset % align, 0);
                        assert!(allocation.consumed_offset + allocation.consumed_size <= CAPACITY);
                        assert!(allocation.offset + size <= CAPACITY);
                        allocations.push(allocation);
                    }
                    None => assert!(!available),
                }
            } else {
                let index = rand.next_u32() as usize % allocations.len();
                let allocation = allocations.swap_remove(index);
                allocator
                    .sub_free(allocation.consumed_offset, allocation.consumed_size)
                    .unwrap();
            }

            if iteration % 50 == 0 {
                check_integrity(&allocator, &allocations);
            }
        }

        check_integrity(&allocator, &allocations);

        for allocation in allocations.drain(..) {
            allocator
                .sub_free(allocation.consumed_offset, allocation.consumed_size)
                .unwrap();
        }

        assert!(allocator.is_empty());
    }
}
