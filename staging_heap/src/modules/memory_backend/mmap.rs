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

use std::{io, ptr::null_mut, ptr::NonNull};

use libc::{
    c_void, mmap, munmap, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE,
    _SC_PAGE_SIZE,
};

use super::{MappedMemory, MemoryBackendModule, StagingDirection};
use crate::{util::round_up_to_nearest, StagingError, StagingResult};

/// Handle of an anonymous mapping, `len` is the length that was actually mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MMapHandle {
    base: usize,
    len: usize,
}

/// Memory backend that maps anonymous pages with `mmap`
pub struct MMapMemoryBackend {
    page_size: usize,
}

impl MMapMemoryBackend {
    pub fn new() -> Self {
        let page_size = unsafe { sysconf(_SC_PAGE_SIZE) };

        Self {
            page_size: if page_size > 0 { page_size as usize } else { 4096 },
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Default for MMapMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackendModule for MMapMemoryBackend {
    type Handle = MMapHandle;

    fn allocate(
        &mut self,
        size: usize,
        _direction: StagingDirection,
    ) -> StagingResult<MappedMemory<Self::Handle>> {
        let len = round_up_to_nearest(size.max(1), self.page_size);

        let base_ptr = unsafe {
            mmap(
                null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base_ptr == MAP_FAILED {
            return Err(StagingError::AllocationFailure {
                size,
                reason: io::Error::last_os_error().to_string(),
            });
        }

        let ptr = NonNull::new(base_ptr as *mut u8).ok_or_else(|| StagingError::AllocationFailure {
            size,
            reason: "mmap returned null".to_string(),
        })?;

        Ok(MappedMemory {
            handle: MMapHandle {
                base: ptr.as_ptr() as usize,
                len,
            },
            ptr,
            size,
        })
    }

    unsafe fn free(&mut self, memory: MappedMemory<Self::Handle>) {
        debug_assert_eq!(memory.handle.base, memory.ptr.as_ptr() as usize);

        let code = unsafe { munmap(memory.ptr.as_ptr() as *mut c_void, memory.handle.len) };

        if code != 0 {
            log::error!(
                "could not unmap staging block {:?}: {}",
                memory.handle,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::MMapMemoryBackend;
    use crate::modules::memory_backend::{
        test::test_memory_backend_generic, MemoryBackendModule, StagingDirection,
    };

    #[test]
    fn test_mmap_memory_backend() {
        test_memory_backend_generic(MMapMemoryBackend::new());
    }

    #[test]
    fn test_mmap_memory_backend_page_rounding() {
        let mut backend = MMapMemoryBackend::new();
        let page_size = backend.page_size();

        let memory = backend.allocate(page_size + 1, StagingDirection::ToDevice).unwrap();
        assert_eq!(memory.size, page_size + 1);
        assert_eq!(memory.handle.len, 2 * page_size);
        assert_eq!(memory.ptr.as_ptr() as usize % page_size, 0);

        unsafe { backend.free(memory) };
    }
}
