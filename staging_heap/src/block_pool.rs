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

use core::{fmt::Debug, slice};

use log::{debug, info};

use crate::{
    modules::memory_backend::{MappedMemory, MemoryBackendModule, StagingDirection},
    range_allocator::{aligned_size, RangeAllocator, SubAllocation},
    util::{checked_round_up, slot_arena::{SlotArena, SlotKey}},
    StagingError, StagingResult,
};

/// Handle of a block inside of a `BlockPool`.
///
/// Handles of retired blocks are rejected, even if their slot was reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(SlotKey);

impl BlockHandle {
    /// Slot index of this block
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Total capacity of all blocks and the part of it that is currently handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Utilization {
    pub allocated_bytes: usize,
    pub used_bytes: usize,
}

impl Utilization {
    /// `used_bytes / allocated_bytes`, or `0.0` if nothing is allocated
    pub fn ratio(&self) -> f64 {
        if self.allocated_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.allocated_bytes as f64
        }
    }
}

/// One real memory allocation with a persistent mapping, sub-allocated by a `RangeAllocator`
pub struct Block<H> {
    handle: BlockHandle,
    direction: StagingDirection,
    memory: MappedMemory<H>,
    allocator: RangeAllocator,
}

impl<H: Copy + Eq + Debug> Block<H> {
    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    pub fn direction(&self) -> StagingDirection {
        self.direction
    }

    pub fn capacity(&self) -> usize {
        self.allocator.capacity()
    }

    /// Backend handle of the underlying memory
    pub fn memory_handle(&self) -> H {
        self.memory.handle
    }

    pub fn allocator(&self) -> &RangeAllocator {
        &self.allocator
    }

    pub fn is_empty(&self) -> bool {
        self.allocator.is_empty()
    }

    fn check_range(&self, offset: usize, size: usize) -> StagingResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(StagingError::InvalidRange { offset, size }),
        }
    }

    /// Mapped bytes `[offset, offset + size)` of this block
    pub(crate) fn bytes(&self, offset: usize, size: usize) -> StagingResult<&[u8]> {
        self.check_range(offset, size)?;

        // SAFETY: the mapping covers `capacity` bytes for the whole lifetime of the block
        // and the returned slice borrows the block
        Ok(unsafe { slice::from_raw_parts(self.memory.ptr.as_ptr().add(offset), size) })
    }

    /// Mutable mapped bytes `[offset, offset + size)` of this block
    pub(crate) fn bytes_mut(&mut self, offset: usize, size: usize) -> StagingResult<&mut [u8]> {
        self.check_range(offset, size)?;

        // SAFETY: see `bytes`, the mutable borrow of the block makes the slice exclusive
        Ok(unsafe { slice::from_raw_parts_mut(self.memory.ptr.as_ptr().add(offset), size) })
    }
}

/// All blocks of a staging memory manager.
///
/// Blocks live in a slot arena: retiring a block frees its memory and
/// recycles its slot for the next block that has to be created.
pub struct BlockPool<H> {
    blocks: SlotArena<Block<H>>,
    block_size: usize,
    granularity: usize,
}

impl<H: Copy + Eq + Debug> BlockPool<H> {
    /// `block_size` is the default capacity of new blocks, rounded up to `granularity`
    pub fn new(block_size: usize, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two());

        Self {
            blocks: SlotArena::new(),
            block_size: aligned_size(block_size, granularity),
            granularity,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Capacity a new block needs to serve `size` bytes at `align`
    fn capacity_for(&self, size: usize, align: usize) -> StagingResult<usize> {
        let request = checked_round_up(size.max(1), align)
            .and_then(|rounded| checked_round_up(rounded, self.granularity))
            .ok_or_else(|| StagingError::AllocationFailure {
                size,
                reason: "requested size overflows".to_string(),
            })?;

        Ok(request.max(self.block_size))
    }

    /// Sub-allocates `size` bytes from the first block (in slot order) with a
    /// matching direction that has space left.
    ///
    /// If no block fits, a new block is created in a retired slot or in a new
    /// slot. A new block is at least `block_size` big and grows to fit
    /// oversized requests.
    pub fn find_or_create<B: MemoryBackendModule<Handle = H>>(
        &mut self,
        size: usize,
        align: usize,
        direction: StagingDirection,
        backend: &mut B,
    ) -> StagingResult<(BlockHandle, SubAllocation)> {
        let existing = self.blocks.iter().find_map(|(key, block)| {
            if block.direction == direction && block.allocator.is_available(size, align) {
                Some(key)
            } else {
                None
            }
        });

        let key = match existing {
            Some(key) => key,
            None => self.create_block(size, align, direction, backend)?,
        };

        let block = self
            .blocks
            .get_mut(key)
            .ok_or(StagingError::InvalidState("block vanished during allocation"))?;

        let allocation = block
            .allocator
            .sub_allocate(size, align)
            .ok_or(StagingError::InvalidState("block has no space left after availability check"))?;

        Ok((block.handle, allocation))
    }

    fn create_block<B: MemoryBackendModule<Handle = H>>(
        &mut self,
        size: usize,
        align: usize,
        direction: StagingDirection,
        backend: &mut B,
    ) -> StagingResult<SlotKey> {
        let capacity = self.capacity_for(size, align)?;
        let memory = backend.allocate(capacity, direction)?;

        if memory.size < capacity {
            let actual = memory.size;
            unsafe { backend.free(memory) };

            return Err(StagingError::AllocationFailure {
                size: capacity,
                reason: format!("backend returned a block of only {} bytes", actual),
            });
        }

        let granularity = self.granularity;
        let key = self.blocks.insert_with(|key| Block {
            handle: BlockHandle(key),
            direction,
            memory,
            allocator: RangeAllocator::with_granularity(capacity, granularity),
        });

        info!(
            "created staging block {} ({:?}, {} bytes) for a request of {} bytes",
            key.index(),
            direction,
            capacity,
            size
        );

        Ok(key)
    }

    /// Returns `[offset, offset + size)` to its block.
    ///
    /// Returns `true` if the block is empty afterwards.
    pub fn sub_free(&mut self, handle: BlockHandle, offset: usize, size: usize) -> StagingResult<bool> {
        let block = self
            .blocks
            .get_mut(handle.0)
            .ok_or(StagingError::InvalidState("entry references a retired block"))?;

        block.allocator.sub_free(offset, size)?;

        Ok(block.allocator.is_empty())
    }

    /// Frees the memory of an empty block and recycles its slot
    pub fn retire<B: MemoryBackendModule<Handle = H>>(
        &mut self,
        handle: BlockHandle,
        backend: &mut B,
    ) -> StagingResult<()> {
        match self.blocks.get(handle.0) {
            None => return Err(StagingError::InvalidState("block was already retired")),
            Some(block) if !block.is_empty() => {
                return Err(StagingError::InvalidState("cannot retire a block that is still in use"))
            }
            Some(_) => {}
        }

        if let Some(block) = self.blocks.remove(handle.0) {
            info!(
                "retiring staging block {} ({} bytes)",
                handle.index(),
                block.capacity()
            );

            unsafe { backend.free(block.memory) };
        }

        Ok(())
    }

    /// Retires all empty blocks and returns how many were retired
    pub fn free_unused<B: MemoryBackendModule<Handle = H>>(&mut self, backend: &mut B) -> StagingResult<usize> {
        let empty: Vec<BlockHandle> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.is_empty())
            .map(|(_, block)| block.handle)
            .collect();

        for handle in empty.iter() {
            self.retire(*handle, backend)?;
        }

        if !empty.is_empty() {
            debug!("freed {} unused staging blocks", empty.len());
        }

        Ok(empty.len())
    }

    /// Frees every block, used or not.
    ///
    /// Only for teardown: ranges that are still handed out become dangling.
    pub(crate) fn free_all<B: MemoryBackendModule<Handle = H>>(&mut self, backend: &mut B) {
        for key in self.blocks.keys() {
            if let Some(block) = self.blocks.remove(key) {
                unsafe { backend.free(block.memory) };
            }
        }
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&Block<H>> {
        self.blocks.get(handle.0)
    }

    pub(crate) fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut Block<H>> {
        self.blocks.get_mut(handle.0)
    }

    /// Finds the block that owns the backend memory `memory`
    pub fn find_by_memory(&self, memory: H) -> Option<&Block<H>> {
        self.blocks
            .iter()
            .map(|(_, block)| block)
            .find(|block| block.memory.handle == memory)
    }

    pub(crate) fn find_by_memory_mut(&mut self, memory: H) -> Option<&mut Block<H>> {
        let key = self
            .blocks
            .iter()
            .find(|(_, block)| block.memory.handle == memory)
            .map(|(key, _)| key)?;

        self.blocks.get_mut(key)
    }

    /// Live blocks in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Block<H>> {
        self.blocks.iter().map(|(_, block)| block)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of slots including retired ones
    pub fn slot_count(&self) -> usize {
        self.blocks.slot_count()
    }

    pub fn utilization(&self) -> Utilization {
        self.iter().fold(Utilization::default(), |acc, block| Utilization {
            allocated_bytes: acc.allocated_bytes + block.capacity(),
            used_bytes: acc.used_bytes + block.allocator.used_bytes(),
        })
    }
}
