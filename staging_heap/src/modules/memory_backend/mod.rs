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

mod heap;

#[cfg(feature = "use_libc")]
mod mmap;

pub use heap::{HeapAllocationId, HeapMemoryBackend};

#[cfg(feature = "use_libc")]
pub use mmap::{MMapHandle, MMapMemoryBackend};

use core::{fmt::Debug, ptr::NonNull};

use crate::StagingResult;

/// What a staging block is used for.
///
/// Backends may use this as a hint for the kind of memory they hand out
/// (e.g. write-combined memory for uploads and cached memory for read-backs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingDirection {
    /// host writes, device reads
    ToDevice,
    /// device writes, host reads
    FromDevice,
}

/// A block of memory that is persistently mapped into the host address space.
///
/// `[ptr, ptr + size)` stays valid until the memory is passed back to
/// `MemoryBackendModule::free`.
#[derive(Debug)]
pub struct MappedMemory<H> {
    pub handle: H,
    pub ptr: NonNull<u8>,
    pub size: usize,
}

// SAFETY: the mapping is owned exclusively by whoever holds the `MappedMemory`
// and is only reached through `&`/`&mut` borrows of it
unsafe impl<H: Send> Send for MappedMemory<H> {}

/// A module that provides host mapped memory blocks during runtime
/// (e.g. device memory of a graphics API or simply `mmap`)
pub trait MemoryBackendModule {
    /// Opaque handle of a memory block, passed to command recorders as copy source/destination
    type Handle: Copy + Eq + Debug;

    /// Returns a new persistently mapped memory block with at least `size` bytes.
    fn allocate(
        &mut self,
        size: usize,
        direction: StagingDirection,
    ) -> StagingResult<MappedMemory<Self::Handle>>;

    /// Unmaps and frees a memory block.
    ///
    /// ### Safety
    ///
    /// `memory` has to be returned by `allocate` of this backend and the mapping
    /// must not be accessed anymore afterwards.
    unsafe fn free(&mut self, memory: MappedMemory<Self::Handle>);
}

#[cfg(test)]
pub(crate) mod test {
    use super::{MemoryBackendModule, StagingDirection};

    /// allocates a few blocks, fills them and checks that they do not alias
    pub(crate) fn test_memory_backend_generic<B: MemoryBackendModule>(mut backend: B) {
        let sizes = [1usize, 256, 4096, 100_000];

        let mut blocks: Vec<_> = sizes
            .iter()
            .zip(0u8..)
            .map(|(size, i)| {
                let direction = if i % 2 == 0 {
                    StagingDirection::ToDevice
                } else {
                    StagingDirection::FromDevice
                };
                let memory = backend.allocate(*size, direction).unwrap();
                assert!(memory.size >= *size);

                unsafe { core::ptr::write_bytes(memory.ptr.as_ptr(), i + 1, *size) };
                (memory, *size, i + 1)
            })
            .collect();

        for (memory, size, value) in blocks.iter() {
            let bytes = unsafe { core::slice::from_raw_parts(memory.ptr.as_ptr(), *size) };
            assert!(bytes.iter().all(|x| x == value));
        }

        for i in 0..blocks.len() {
            for j in 0..blocks.len() {
                if i != j {
                    assert_ne!(blocks[i].0.handle, blocks[j].0.handle);
                }
            }
        }

        for (memory, _, _) in blocks.drain(..) {
            unsafe { backend.free(memory) };
        }
    }
}
