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

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use static_assertions::assert_impl_all;

/// Completion status of a previously submitted batch of device work
pub trait FenceModule {
    /// Returns `true` once the work guarded by this fence has finished.
    ///
    /// Must not block.
    fn is_signaled(&self) -> bool;
}

impl<T: FenceModule + ?Sized> FenceModule for Box<T> {
    fn is_signaled(&self) -> bool {
        (**self).is_signaled()
    }
}

impl<T: FenceModule + ?Sized> FenceModule for Arc<T> {
    fn is_signaled(&self) -> bool {
        (**self).is_signaled()
    }
}

/// Fence that is signaled from the host, e.g. by a software copy engine
/// or by a thread waiting on a real device fence.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct HostFence {
    signaled: Arc<AtomicBool>,
}

assert_impl_all!(HostFence: Send, Sync, Clone);

impl HostFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }
}

impl FenceModule for HostFence {
    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

/// Fence for work that already finished when it was handed over
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSignaled;

impl FenceModule for AlwaysSignaled {
    fn is_signaled(&self) -> bool {
        true
    }
}
