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

use log::debug;

use crate::{
    block_pool::BlockHandle,
    modules::fence::FenceModule,
    util::slot_arena::{SlotArena, SlotKey},
    StagingError, StagingResult,
};

/// Handle of a staging set, returned by `StagingMemoryManager::finalize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetHandle(SlotKey);

impl SetHandle {
    /// Slot index of this set
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// One outstanding sub-allocation.
///
/// `[offset, offset + size)` is the consumed range inside of the block,
/// alignment padding included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub block: BlockHandle,
    pub offset: usize,
    pub size: usize,
}

/// All entries allocated between two checkpoints, guarded by one fence
pub struct StagingSet<F> {
    handle: SetHandle,
    fence: Option<F>,
    entries: Vec<Entry>,
    finalized: bool,
}

impl<F: FenceModule> StagingSet<F> {
    fn new(handle: SetHandle) -> Self {
        Self {
            handle,
            fence: None,
            entries: Vec::new(),
            finalized: false,
        }
    }

    pub fn handle(&self) -> SetHandle {
        self.handle
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn fence(&self) -> Option<&F> {
        self.fence.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// A finalized set is complete once its fence signaled.
    /// Sets without a fence are complete right away.
    pub fn is_complete(&self) -> bool {
        self.finalized && self.fence.as_ref().map_or(true, |fence| fence.is_signaled())
    }
}

/// Slot arena of staging sets with exactly one open ("active") set.
///
/// Entries are only ever added to the active set. `finalize` closes it and
/// opens the next one.
pub struct StagingSetPool<F> {
    sets: SlotArena<StagingSet<F>>,
    active: Option<SetHandle>,
}

impl<F: FenceModule> StagingSetPool<F> {
    /// Creates the pool with an empty active set
    pub fn new() -> Self {
        let mut pool = Self {
            sets: SlotArena::new(),
            active: None,
        };
        pool.active = Some(pool.open_set());

        pool
    }

    fn open_set(&mut self) -> SetHandle {
        let key = self.sets.insert_with(|key| StagingSet::new(SetHandle(key)));
        SetHandle(key)
    }

    /// The currently open set, `None` after `close`
    pub fn active(&self) -> Option<SetHandle> {
        self.active
    }

    /// Records `entry` in the active set and returns its handle
    pub fn push_entry(&mut self, entry: Entry) -> StagingResult<SetHandle> {
        let active = self
            .active
            .ok_or(StagingError::InvalidState("no active staging set"))?;

        let set = self
            .sets
            .get_mut(active.0)
            .ok_or(StagingError::InvalidState("active staging set is missing"))?;

        set.entries.push(entry);

        Ok(active)
    }

    /// Closes the active set with `fence` and opens a new one.
    ///
    /// Does nothing if the active set has no entries.
    pub fn finalize(&mut self, fence: Option<F>) -> StagingResult<Option<SetHandle>> {
        let active = self
            .active
            .ok_or(StagingError::InvalidState("no active staging set"))?;

        let set = self
            .sets
            .get_mut(active.0)
            .ok_or(StagingError::InvalidState("active staging set is missing"))?;

        if set.entries.is_empty() {
            return Ok(None);
        }

        debug!(
            "finalizing staging set {} with {} entries (fence: {})",
            active.index(),
            set.entries.len(),
            fence.is_some()
        );

        set.fence = fence;
        set.finalized = true;
        self.active = Some(self.open_set());

        Ok(Some(active))
    }

    /// Handles of all finalized sets that are complete, in slot order
    pub fn completed(&self) -> Vec<SetHandle> {
        self.sets
            .iter()
            .filter(|(_, set)| set.is_complete())
            .map(|(_, set)| set.handle)
            .collect()
    }

    /// Removes the active set if it holds entries and opens a new one.
    ///
    /// The active set never has a fence, so its entries are complete as soon
    /// as the caller says so. Handles to the removed set become invalid.
    pub fn take_active(&mut self) -> StagingResult<Option<(SetHandle, Vec<Entry>)>> {
        let active = match self.active {
            Some(active) => active,
            None => return Ok(None),
        };

        let set = self
            .sets
            .get(active.0)
            .ok_or(StagingError::InvalidState("active staging set is missing"))?;

        if set.entries.is_empty() {
            return Ok(None);
        }

        let entries = self
            .sets
            .remove(active.0)
            .map(|set| set.entries)
            .ok_or(StagingError::InvalidState("active staging set is missing"))?;
        self.active = Some(self.open_set());

        Ok(Some((active, entries)))
    }

    /// Removes a finalized set regardless of its fence and returns its entries
    pub fn remove_finalized(&mut self, handle: SetHandle) -> StagingResult<Vec<Entry>> {
        match self.sets.get(handle.0) {
            None => return Err(StagingError::InvalidState("staging set was already released")),
            Some(set) if !set.finalized => {
                return Err(StagingError::InvalidState("cannot release the active staging set"))
            }
            Some(_) => {}
        }

        self.sets
            .remove(handle.0)
            .map(|set| set.entries)
            .ok_or(StagingError::InvalidState("staging set was already released"))
    }

    /// Drops the active set. Fails if any set still holds entries.
    pub fn close(&mut self) -> StagingResult<()> {
        if self.has_outstanding_entries() {
            return Err(StagingError::InvalidState(
                "staging sets still hold entries, release them first",
            ));
        }

        if let Some(active) = self.active.take() {
            self.sets.remove(active.0);
        }

        debug_assert!(self.sets.is_empty());

        Ok(())
    }

    pub fn get(&self, handle: SetHandle) -> Option<&StagingSet<F>> {
        self.sets.get(handle.0)
    }

    pub fn contains(&self, handle: SetHandle) -> bool {
        self.sets.contains(handle.0)
    }

    pub fn has_outstanding_entries(&self) -> bool {
        self.sets.iter().any(|(_, set)| !set.entries.is_empty())
    }

    /// Number of finalized sets that were not released yet
    pub fn pending_count(&self) -> usize {
        self.sets.iter().filter(|(_, set)| set.finalized).count()
    }

    /// Number of entries over all sets
    pub fn entry_count(&self) -> usize {
        self.sets.iter().map(|(_, set)| set.entries.len()).sum()
    }

    /// All live sets in slot order
    pub fn iter(&self) -> impl Iterator<Item = &StagingSet<F>> {
        self.sets.iter().map(|(_, set)| set)
    }
}

impl<F: FenceModule> Default for StagingSetPool<F> {
    fn default() -> Self {
        Self::new()
    }
}
