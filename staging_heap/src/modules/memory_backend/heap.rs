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

use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    collections::HashMap,
    ptr::NonNull,
};

use super::{MappedMemory, MemoryBackendModule, StagingDirection};
use crate::{range_allocator::DEFAULT_GRANULARITY, StagingError, StagingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapAllocationId(u64);

/// Memory backend that takes its blocks from the global allocator.
///
/// Useful when the consumer of the staging memory lives on the host
/// (software copy engines, tests). An optional limit makes it refuse
/// allocations once a certain amount of memory is handed out.
pub struct HeapMemoryBackend {
    alignment: usize,
    limit: Option<usize>,
    allocated_bytes: usize,
    next_id: u64,
    allocations: HashMap<u64, Layout>,
}

impl HeapMemoryBackend {
    pub fn new() -> Self {
        Self {
            alignment: DEFAULT_GRANULARITY,
            limit: None,
            allocated_bytes: 0,
            next_id: 1,
            allocations: HashMap::new(),
        }
    }

    /// Refuse allocations once `limit` bytes are handed out
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Alignment of every block start, has to be a power of two
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two());
        self.alignment = alignment;
        self
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Count of blocks that were not freed yet
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }
}

impl Default for HeapMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackendModule for HeapMemoryBackend {
    type Handle = HeapAllocationId;

    fn allocate(
        &mut self,
        size: usize,
        _direction: StagingDirection,
    ) -> StagingResult<MappedMemory<Self::Handle>> {
        if let Some(limit) = self.limit {
            let exceeds_limit = self
                .allocated_bytes
                .checked_add(size)
                .map_or(true, |total| total > limit);

            if exceeds_limit {
                return Err(StagingError::AllocationFailure {
                    size,
                    reason: format!(
                        "limit of {} bytes reached ({} bytes in use)",
                        limit, self.allocated_bytes
                    ),
                });
            }
        }

        let layout = Layout::from_size_align(size.max(1), self.alignment).map_err(|err| {
            StagingError::AllocationFailure {
                size,
                reason: err.to_string(),
            }
        })?;

        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or_else(|| {
            StagingError::AllocationFailure {
                size,
                reason: "global allocator returned null".to_string(),
            }
        })?;

        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(id, layout);
        self.allocated_bytes += size;

        Ok(MappedMemory {
            handle: HeapAllocationId(id),
            ptr,
            size,
        })
    }

    unsafe fn free(&mut self, memory: MappedMemory<Self::Handle>) {
        match self.allocations.remove(&memory.handle.0) {
            Some(layout) => {
                self.allocated_bytes -= memory.size;
                dealloc(memory.ptr.as_ptr(), layout);
            }
            None => {
                log::error!("double free or unknown heap block {:?}", memory.handle);
            }
        }
    }
}

impl Drop for HeapMemoryBackend {
    fn drop(&mut self) {
        if !self.allocations.is_empty() {
            log::warn!(
                "heap memory backend dropped with {} live blocks ({} bytes)",
                self.allocations.len(),
                self.allocated_bytes
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::HeapMemoryBackend;
    use crate::{
        modules::memory_backend::{test::test_memory_backend_generic, MemoryBackendModule, StagingDirection},
        StagingError,
    };

    #[test]
    fn test_heap_memory_backend() {
        test_memory_backend_generic(HeapMemoryBackend::new());
    }

    #[test]
    fn test_heap_memory_backend_limit() {
        let mut backend = HeapMemoryBackend::new().with_limit(1024);

        let a = backend.allocate(1000, StagingDirection::ToDevice).unwrap();
        assert_eq!(backend.allocated_bytes(), 1000);
        assert_eq!(a.ptr.as_ptr() as usize % 256, 0);

        match backend.allocate(100, StagingDirection::ToDevice) {
            Err(StagingError::AllocationFailure { size, .. }) => assert_eq!(size, 100),
            other => panic!("expected allocation failure, got {:?}", other.map(|m| m.size)),
        }

        unsafe { backend.free(a) };
        assert_eq!(backend.allocated_bytes(), 0);
        assert_eq!(backend.live_allocations(), 0);

        let b = backend.allocate(1024, StagingDirection::FromDevice).unwrap();
        assert_eq!(backend.live_allocations(), 1);
        unsafe { backend.free(b) };
    }

    #[test]
    fn test_heap_memory_backend_limit_huge_request() {
        let mut backend = HeapMemoryBackend::new().with_limit(1024);
        let a = backend.allocate(512, StagingDirection::ToDevice).unwrap();

        match backend.allocate(usize::MAX, StagingDirection::ToDevice) {
            Err(StagingError::AllocationFailure { size, .. }) => assert_eq!(size, usize::MAX),
            other => panic!("expected allocation failure, got {:?}", other.map(|m| m.size)),
        }
        assert_eq!(backend.allocated_bytes(), 512);

        unsafe { backend.free(a) };
    }

    #[test]
    fn test_heap_memory_backend_alignment() {
        let mut backend = HeapMemoryBackend::new().with_alignment(4096);

        let blocks: Vec<_> = (0..4)
            .map(|i| backend.allocate(100 + i * 1000, StagingDirection::ToDevice).unwrap())
            .collect();

        for block in blocks.iter() {
            assert_eq!(block.ptr.as_ptr() as usize % 4096, 0);
        }

        for block in blocks {
            unsafe { backend.free(block) };
        }
        assert_eq!(backend.live_allocations(), 0);
    }
}
