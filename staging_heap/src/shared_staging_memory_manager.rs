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

use try_lock::{Locked, TryLock};

use crate::{
    modules::{fence::FenceModule, memory_backend::MemoryBackendModule},
    StagingError, StagingMemoryManager, StagingResult,
};

/// A `StagingMemoryManager` that can be shared between threads.
///
/// Access is non-blocking: if another thread holds the manager, `try_lock`
/// returns `None` and `try_with` fails with `StagingError::InvalidState`.
pub struct SharedStagingMemoryManager<B: MemoryBackendModule, F: FenceModule> {
    inner: TryLock<StagingMemoryManager<B, F>>,
}

impl<B: MemoryBackendModule, F: FenceModule> SharedStagingMemoryManager<B, F> {
    pub fn new(manager: StagingMemoryManager<B, F>) -> Self {
        Self {
            inner: TryLock::new(manager),
        }
    }

    pub fn try_lock(&self) -> Option<Locked<'_, StagingMemoryManager<B, F>>> {
        self.inner.try_lock()
    }

    /// Runs `func` with exclusive access to the manager
    pub fn try_with<R, Func: FnOnce(&mut StagingMemoryManager<B, F>) -> StagingResult<R>>(
        &self,
        func: Func,
    ) -> StagingResult<R> {
        let mut guard = self
            .inner
            .try_lock()
            .ok_or(StagingError::InvalidState("staging memory manager is locked"))?;

        func(&mut guard)
    }

    pub fn into_inner(self) -> StagingMemoryManager<B, F> {
        self.inner.into_inner()
    }
}
