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

use log::{debug, trace, warn};

use crate::{
    block_pool::{BlockHandle, BlockPool, Utilization},
    modules::{
        command_recorder::{BufferImageCopy, CommandRecorderModule, Extent3D, ImageSubresourceLayers, Offset3D},
        fence::FenceModule,
        memory_backend::{MemoryBackendModule, StagingDirection},
    },
    staging_set::{Entry, SetHandle, StagingSetPool},
    util::check_alignment,
    StagingConfig, StagingError, StagingResult,
};

/// Alignment of the staging ranges used by the `cmd_*` functions
pub const COPY_ALIGNMENT: usize = 16;

/// A range of staging memory handed out by `StagingMemoryManager`.
///
/// The range belongs to the staging set `set` and stays valid until that set
/// is released. Its bytes are reached through `StagingMemoryManager::mapped`
/// and `StagingMemoryManager::mapped_mut`, which fail once the set is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingSpace<H> {
    pub set: SetHandle,
    pub block: BlockHandle,
    /// backend memory of the block, used as copy source or destination
    pub memory: H,
    /// aligned offset inside of `memory`
    pub offset: usize,
    pub size: usize,
}

/// Hands out short-lived staging ranges from a few big host mapped blocks
/// and takes them back once the device is done with them.
///
/// Every range is recorded in the active staging set. `finalize` closes that
/// set with a fence, and `release` gives the ranges of all sets without a
/// pending fence back to their blocks. A range of a fenced set is never reused
/// before that fence signaled. The active set has no fence and is released by
/// every `release` call.
///
/// The manager is not synchronized. Use one manager per thread/queue or wrap it
/// in a `SharedStagingMemoryManager`.
pub struct StagingMemoryManager<B: MemoryBackendModule, F: FenceModule> {
    backend: B,
    blocks: BlockPool<B::Handle>,
    sets: StagingSetPool<F>,
    free_on_release: bool,
}

impl<B: MemoryBackendModule, F: FenceModule> StagingMemoryManager<B, F> {
    pub fn new(backend: B, config: StagingConfig) -> StagingResult<Self> {
        config.validate()?;

        debug!("creating staging memory manager with {:?}", config);

        Ok(Self {
            backend,
            blocks: BlockPool::new(config.block_size, config.granularity),
            sets: StagingSetPool::new(),
            free_on_release: config.free_on_release,
        })
    }

    /// Sub-allocates `size` bytes aligned to `align` for an upload.
    ///
    /// A new block is created if no existing block has space left. Failing to
    /// create that block is reported as `StagingError::AllocationFailure`.
    pub fn request_space(&mut self, size: usize, align: usize) -> StagingResult<StagingSpace<B::Handle>> {
        self.request_space_for(size, align, StagingDirection::ToDevice)
    }

    /// Same as `request_space`, but for memory the device writes and the host reads
    pub fn request_readback_space(
        &mut self,
        size: usize,
        align: usize,
    ) -> StagingResult<StagingSpace<B::Handle>> {
        self.request_space_for(size, align, StagingDirection::FromDevice)
    }

    fn request_space_for(
        &mut self,
        size: usize,
        align: usize,
        direction: StagingDirection,
    ) -> StagingResult<StagingSpace<B::Handle>> {
        check_alignment(align)?;

        if self.sets.active().is_none() {
            return Err(StagingError::InvalidState("no active staging set"));
        }

        let (block, allocation) = self
            .blocks
            .find_or_create(size, align, direction, &mut self.backend)?;

        let memory = self
            .blocks
            .get(block)
            .map(|block| block.memory_handle())
            .ok_or(StagingError::InvalidState("block vanished during allocation"))?;

        let set = self.sets.push_entry(Entry {
            block,
            offset: allocation.consumed_offset,
            size: allocation.consumed_size,
        })?;

        trace!(
            "staging space of {} bytes at block {} offset {} (set {})",
            size,
            block.index(),
            allocation.offset,
            set.index()
        );

        Ok(StagingSpace {
            set,
            block,
            memory,
            offset: allocation.offset,
            size,
        })
    }

    fn check_space(&self, space: &StagingSpace<B::Handle>) -> StagingResult<()> {
        if self.sets.contains(space.set) {
            Ok(())
        } else {
            Err(StagingError::InvalidState("staging set of this space was already released"))
        }
    }

    /// Mapped bytes of `space`
    pub fn mapped(&self, space: &StagingSpace<B::Handle>) -> StagingResult<&[u8]> {
        self.check_space(space)?;

        self.blocks
            .get(space.block)
            .ok_or(StagingError::InvalidState("block of this space was retired"))?
            .bytes(space.offset, space.size)
    }

    /// Mutable mapped bytes of `space`
    pub fn mapped_mut(&mut self, space: &StagingSpace<B::Handle>) -> StagingResult<&mut [u8]> {
        self.check_space(space)?;

        self.blocks
            .get_mut(space.block)
            .ok_or(StagingError::InvalidState("block of this space was retired"))?
            .bytes_mut(space.offset, space.size)
    }

    /// Raw bytes `[offset, offset + size)` of the block that owns backend memory `memory`.
    ///
    /// Meant for host side consumers of recorded copies (software copy engines).
    /// Does not check whether the range is handed out.
    pub fn memory_slice(&self, memory: B::Handle, offset: usize, size: usize) -> StagingResult<&[u8]> {
        self.blocks
            .find_by_memory(memory)
            .ok_or(StagingError::InvalidState("memory does not belong to a live block"))?
            .bytes(offset, size)
    }

    /// Mutable version of `memory_slice`
    pub fn memory_slice_mut(
        &mut self,
        memory: B::Handle,
        offset: usize,
        size: usize,
    ) -> StagingResult<&mut [u8]> {
        self.blocks
            .find_by_memory_mut(memory)
            .ok_or(StagingError::InvalidState("memory does not belong to a live block"))?
            .bytes_mut(offset, size)
    }

    fn check_data(size: usize, data: Option<&[u8]>) -> StagingResult<()> {
        match data {
            Some(data) if data.len() != size => Err(StagingError::SizeMismatch {
                expected: size,
                actual: data.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Copies `data` into `space`, or hands `space` back if there is no data
    fn write_or_defer(
        &mut self,
        space: StagingSpace<B::Handle>,
        data: Option<&[u8]>,
    ) -> StagingResult<Option<StagingSpace<B::Handle>>> {
        match data {
            Some(data) => {
                self.mapped_mut(&space)?.copy_from_slice(data);
                Ok(None)
            }
            None => Ok(Some(space)),
        }
    }

    /// Records a copy of `size` bytes from staging memory to `dst` at `dst_offset`.
    ///
    /// If `data` is given it is written to the staging memory right away and
    /// `None` is returned. Otherwise the staging space is returned and the caller
    /// has to fill it through `mapped_mut` before the copy executes.
    /// Zero sized copies are skipped.
    pub fn cmd_to_buffer<R: CommandRecorderModule<B::Handle>>(
        &mut self,
        recorder: &mut R,
        dst: &R::Buffer,
        dst_offset: usize,
        size: usize,
        data: Option<&[u8]>,
    ) -> StagingResult<Option<StagingSpace<B::Handle>>> {
        if size == 0 {
            return Ok(None);
        }

        Self::check_data(size, data)?;

        let space = self.request_space(size, COPY_ALIGNMENT)?;
        recorder.copy_buffer_to_buffer(space.memory, space.offset, dst, dst_offset, size);

        self.write_or_defer(space, data)
    }

    /// Records a copy of `size` bytes from staging memory into the region
    /// `offset`/`extent` of `dst`. Data handling as in `cmd_to_buffer`.
    #[allow(clippy::too_many_arguments)]
    pub fn cmd_to_image<R: CommandRecorderModule<B::Handle>>(
        &mut self,
        recorder: &mut R,
        dst: &R::Image,
        offset: Offset3D,
        extent: Extent3D,
        subresource: ImageSubresourceLayers,
        size: usize,
        data: Option<&[u8]>,
    ) -> StagingResult<Option<StagingSpace<B::Handle>>> {
        if size == 0 {
            return Ok(None);
        }

        Self::check_data(size, data)?;

        let space = self.request_space(size, COPY_ALIGNMENT)?;
        let region = BufferImageCopy {
            buffer_offset: space.offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: subresource,
            image_offset: offset,
            image_extent: extent,
        };
        recorder.copy_buffer_to_image(space.memory, dst, &region);

        self.write_or_defer(space, data)
    }

    /// Records a copy of `size` bytes from `src` at `src_offset` into read-back
    /// staging memory.
    ///
    /// The returned space holds the data once the fence of its set signaled.
    /// Read it through `mapped` before calling `release`.
    pub fn cmd_from_buffer<R: CommandRecorderModule<B::Handle>>(
        &mut self,
        recorder: &mut R,
        src: &R::Buffer,
        src_offset: usize,
        size: usize,
    ) -> StagingResult<StagingSpace<B::Handle>> {
        let space = self.request_readback_space(size, COPY_ALIGNMENT)?;
        recorder.copy_buffer_to_staging(src, src_offset, space.memory, space.offset, size);

        Ok(space)
    }

    /// Records a copy of the region `offset`/`extent` of `src` into read-back
    /// staging memory of `size` bytes. See `cmd_from_buffer`.
    pub fn cmd_from_image<R: CommandRecorderModule<B::Handle>>(
        &mut self,
        recorder: &mut R,
        src: &R::Image,
        offset: Offset3D,
        extent: Extent3D,
        subresource: ImageSubresourceLayers,
        size: usize,
    ) -> StagingResult<StagingSpace<B::Handle>> {
        let space = self.request_readback_space(size, COPY_ALIGNMENT)?;
        let region = BufferImageCopy {
            buffer_offset: space.offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: subresource,
            image_offset: offset,
            image_extent: extent,
        };
        recorder.copy_image_to_staging(src, space.memory, &region);

        Ok(space)
    }

    /// Closes the active staging set with `fence` and opens a new one.
    ///
    /// Pass `None` for work that is already complete on the host. Returns the
    /// handle of the closed set, or `None` if the active set was empty.
    pub fn finalize(&mut self, fence: Option<F>) -> StagingResult<Option<SetHandle>> {
        self.sets.finalize(fence)
    }

    /// Releases every set whose fence signaled or that has no fence and
    /// returns the number of released sets.
    ///
    /// The active set has no fence, so its entries are released as well and a
    /// new active set is opened. Spaces handed out since the last `finalize`
    /// must therefore only be released once the device finished with them;
    /// `finalize` them with a fence otherwise.
    ///
    /// Sets with a pending fence are left alone. Never waits. Sets are removed
    /// one at a time, so after an error the remaining sets are still pending.
    pub fn release(&mut self) -> StagingResult<usize> {
        let completed = self.sets.completed();

        for handle in completed.iter() {
            let entries = self.sets.remove_finalized(*handle)?;

            debug!(
                "releasing staging set {} with {} entries",
                handle.index(),
                entries.len()
            );
            self.release_entries(&entries)?;
        }

        let mut released = completed.len();

        if let Some((handle, entries)) = self.sets.take_active()? {
            debug!(
                "releasing unfenced active staging set {} with {} entries",
                handle.index(),
                entries.len()
            );
            self.release_entries(&entries)?;
            released += 1;
        }

        Ok(released)
    }

    /// Releases a finalized set without looking at its fence.
    ///
    /// The caller guarantees that the device is done with it (e.g. after
    /// waiting for the queue to become idle). Releasing a set twice or
    /// releasing the active set is an `InvalidState` error.
    pub fn release_set(&mut self, handle: SetHandle) -> StagingResult<()> {
        let entries = self.sets.remove_finalized(handle)?;

        debug!(
            "releasing staging set {} with {} entries on request",
            handle.index(),
            entries.len()
        );

        self.release_entries(&entries)
    }

    fn release_entries(&mut self, entries: &[Entry]) -> StagingResult<()> {
        for entry in entries {
            let empty = self.blocks.sub_free(entry.block, entry.offset, entry.size)?;

            if empty && self.free_on_release {
                self.blocks.retire(entry.block, &mut self.backend)?;
            }
        }

        Ok(())
    }

    /// Retires every empty block right now, independent of `free_on_release`.
    /// Returns the number of retired blocks.
    pub fn free_unused(&mut self) -> StagingResult<usize> {
        self.blocks.free_unused(&mut self.backend)
    }

    pub fn set_free_on_release(&mut self, free_on_release: bool) {
        self.free_on_release = free_on_release;
    }

    pub fn free_on_release(&self) -> bool {
        self.free_on_release
    }

    /// Total capacity of all blocks and how much of it is handed out
    pub fn utilization(&self) -> Utilization {
        self.blocks.utilization()
    }

    /// Tears the manager down and frees all blocks.
    ///
    /// All staging sets have to be released before. Afterwards every request
    /// fails with `StagingError::InvalidState`.
    pub fn deinit(&mut self) -> StagingResult<()> {
        self.sets.close()?;

        let retired = self.blocks.free_unused(&mut self.backend)?;
        debug!("staging memory manager deinitialized, {} blocks freed", retired);

        debug_assert_eq!(self.blocks.block_count(), 0);

        Ok(())
    }

    /// Handle of the staging set new allocations go to
    pub fn active_set(&self) -> Option<SetHandle> {
        self.sets.active()
    }

    pub fn pending_set_count(&self) -> usize {
        self.sets.pending_count()
    }

    pub fn blocks(&self) -> &BlockPool<B::Handle> {
        &self.blocks
    }

    pub fn sets(&self) -> &StagingSetPool<F> {
        &self.sets
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: MemoryBackendModule, F: FenceModule> Drop for StagingMemoryManager<B, F> {
    fn drop(&mut self) {
        if self.sets.has_outstanding_entries() {
            warn!(
                "staging memory manager dropped with {} outstanding entries",
                self.sets.entry_count()
            );
        }

        self.blocks.free_all(&mut self.backend);
    }
}

#[cfg(test)]
mod test {
    use super::StagingMemoryManager;
    use crate::{
        modules::{
            command_recorder::RecordingCommandRecorder,
            fence::HostFence,
            memory_backend::{HeapMemoryBackend, StagingDirection},
        },
        staging_set::Entry,
        StagingConfig, StagingError,
    };

    fn get_test_manager(block_size: usize) -> StagingMemoryManager<HeapMemoryBackend, HostFence> {
        StagingMemoryManager::new(
            HeapMemoryBackend::new(),
            StagingConfig::default().with_block_size(block_size),
        )
        .unwrap()
    }

    #[test]
    fn test_manager_invalid_config() {
        let res: Result<StagingMemoryManager<HeapMemoryBackend, HostFence>, _> = StagingMemoryManager::new(
            HeapMemoryBackend::new(),
            StagingConfig::default().with_block_size(0),
        );
        assert!(matches!(res, Err(StagingError::InvalidConfig(_))));
    }

    #[test]
    fn test_manager_invalid_alignment() {
        let mut manager = get_test_manager(1024);
        assert_eq!(
            manager.request_space(16, 3).unwrap_err(),
            StagingError::InvalidAlignment(3)
        );
        assert_eq!(manager.blocks().block_count(), 0);
    }

    #[test]
    fn test_manager_mapped_write_read() {
        let mut manager = get_test_manager(1024);
        let space = manager.request_space(64, 16).unwrap();

        manager.mapped_mut(&space).unwrap().copy_from_slice(&[7u8; 64]);
        assert_eq!(manager.mapped(&space).unwrap(), &[7u8; 64]);
        assert_eq!(
            manager.memory_slice(space.memory, space.offset, 64).unwrap(),
            &[7u8; 64]
        );

        manager.finalize(None).unwrap();
        manager.release().unwrap();

        // released, the space must not be touched anymore
        assert!(manager.mapped(&space).is_err());
        assert!(manager.mapped_mut(&space).is_err());
    }

    #[test]
    fn test_manager_size_mismatch() {
        let mut manager = get_test_manager(1024);
        let mut recorder = RecordingCommandRecorder::new();

        assert_eq!(
            manager
                .cmd_to_buffer(&mut recorder, &1, 0, 16, Some(&[0u8; 8]))
                .unwrap_err(),
            StagingError::SizeMismatch {
                expected: 16,
                actual: 8
            }
        );
        assert!(recorder.is_empty());
        assert_eq!(manager.utilization().used_bytes, 0);

        // zero sized copies are skipped
        assert_eq!(manager.cmd_to_buffer(&mut recorder, &1, 0, 0, None).unwrap(), None);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_manager_release_set_explicitly() {
        let mut manager = get_test_manager(1024);
        manager.request_space(100, 16).unwrap();

        let fence = HostFence::new();
        let handle = manager.finalize(Some(fence)).unwrap().unwrap();

        // fence never signals, but the caller knows the work is done
        assert_eq!(manager.release().unwrap(), 0);
        manager.release_set(handle).unwrap();
        assert_eq!(manager.utilization().used_bytes, 0);

        assert_eq!(
            manager.release_set(handle).unwrap_err(),
            StagingError::InvalidState("staging set was already released")
        );

        let active = manager.active_set().unwrap();
        assert!(manager.release_set(active).is_err());
    }

    #[test]
    fn test_manager_readback_space_uses_own_blocks() {
        let mut manager = get_test_manager(1024);
        let upload = manager.request_space(16, 16).unwrap();
        let readback = manager.request_readback_space(16, 16).unwrap();

        assert_ne!(upload.block, readback.block);
        assert_eq!(
            manager.blocks().get(readback.block).unwrap().direction(),
            StagingDirection::FromDevice
        );

        manager.finalize(None).unwrap();
        manager.release().unwrap();
        manager.deinit().unwrap();
    }

    #[test]
    fn test_manager_deinit() {
        let mut manager = get_test_manager(1024);
        manager.set_free_on_release(false);
        assert!(!manager.free_on_release());

        manager.request_space(100, 16).unwrap();
        assert!(manager.deinit().is_err());

        manager.finalize(None).unwrap();
        assert_eq!(manager.release().unwrap(), 1);

        // the empty block was kept because of the lazy policy
        assert_eq!(manager.blocks().block_count(), 1);

        manager.deinit().unwrap();
        assert_eq!(manager.blocks().block_count(), 0);
        assert_eq!(manager.backend().live_allocations(), 0);
        assert_eq!(manager.active_set(), None);

        assert_eq!(
            manager.request_space(16, 16).unwrap_err(),
            StagingError::InvalidState("no active staging set")
        );
        assert!(manager.finalize(None).is_err());
    }

    #[test]
    fn test_manager_drop_frees_blocks() {
        let mut manager = get_test_manager(1024);
        manager.request_space(100, 16).unwrap();
        manager.request_readback_space(100, 16).unwrap();
        assert_eq!(manager.backend().live_allocations(), 2);

        // dropping with outstanding entries only warns, the memory is still freed
        drop(manager);
    }

    #[test]
    fn test_manager_release_keeps_later_sets_after_error() {
        let mut manager = get_test_manager(1024);
        manager.set_free_on_release(false);

        // first set holds a range that does not belong to its block
        let space = manager.request_space(100, 16).unwrap();
        manager
            .sets
            .push_entry(Entry {
                block: space.block,
                offset: 4096,
                size: 16,
            })
            .unwrap();
        manager.finalize(None).unwrap();

        let second = manager.request_space(100, 16).unwrap();
        manager.finalize(None).unwrap();

        assert_eq!(
            manager.release().unwrap_err(),
            StagingError::InvalidRange {
                offset: 4096,
                size: 16
            }
        );

        // the second set was not touched by the failed release
        assert!(manager.sets().contains(second.set));
        assert!(manager.mapped(&second).is_ok());
        assert_eq!(manager.utilization().used_bytes, 112);

        assert_eq!(manager.release().unwrap(), 1);
        assert_eq!(manager.utilization().used_bytes, 0);
    }

    #[test]
    fn test_manager_rejects_overflowing_block_size() {
        let res: Result<StagingMemoryManager<HeapMemoryBackend, HostFence>, _> = StagingMemoryManager::new(
            HeapMemoryBackend::new(),
            StagingConfig::default().with_block_size(usize::MAX - 10),
        );
        assert!(matches!(res, Err(StagingError::InvalidConfig(_))));
    }
}
