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

/// Index of a slot together with the generation it was handed out in.
///
/// A key only resolves while the slot still holds the value it was created
/// for. Once the value is removed the generation of the slot is bumped, so
/// stale keys are rejected even if the index got reused in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    #[allow(dead_code)]
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot array with a stack of retired indices.
///
/// Removing a value never shrinks or moves the slot array, so indices stay
/// stable and churn does not reallocate.
pub(crate) struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free_indices: Vec<u32>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            len: 0,
        }
    }

    /// Stores the value returned by `create` in a retired slot if there is one,
    /// otherwise in a new slot. `create` receives the key of the slot.
    pub(crate) fn insert_with<C: FnOnce(SlotKey) -> T>(&mut self, create: C) -> SlotKey {
        let key = match self.free_indices.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.value.is_none(), "free list contains a used slot");

                SlotKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });

                SlotKey {
                    index,
                    generation: 0,
                }
            }
        };

        self.slots[key.index()].value = Some(create(key));
        self.len += 1;

        key
    }

    /// Removes the value of `key` and puts the slot onto the free list
    pub(crate) fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push(key.index);
        self.len -= 1;

        Some(value)
    }

    pub(crate) fn get(&self, key: SlotKey) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over all live values in slot order
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Keys of all live values in slot order
    pub(crate) fn keys(&self) -> Vec<SlotKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, used or retired
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::SlotArena;

    #[test]
    fn test_slot_arena_insert_remove() {
        let mut arena: SlotArena<u32> = SlotArena::new();
        assert!(arena.is_empty());

        let a = arena.insert_with(|_| 10);
        let b = arena.insert_with(|key| key.index() as u32 + 100);

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&10));
        assert_eq!(arena.get(b), Some(&101));

        assert_eq!(arena.remove(a), Some(10));
        assert_eq!(arena.len(), 1);
        assert!(!arena.contains(a));

        // double remove is rejected
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn test_slot_arena_recycles_indices() {
        let mut arena: SlotArena<&'static str> = SlotArena::new();
        let a = arena.insert_with(|_| "a");
        let _b = arena.insert_with(|_| "b");

        arena.remove(a).unwrap();

        // the retired slot is reused instead of growing the slot array
        let c = arena.insert_with(|_| "c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.slot_count(), 2);

        // the old key does not resolve to the new value
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&"c"));
    }

    #[test]
    fn test_slot_arena_iter_in_slot_order() {
        let mut arena: SlotArena<usize> = SlotArena::new();
        let keys: Vec<_> = (0..5).map(|i| arena.insert_with(|_| i)).collect();

        arena.remove(keys[1]).unwrap();
        arena.remove(keys[3]).unwrap();

        let values: Vec<usize> = arena.iter().map(|(_, value)| *value).collect();
        assert_eq!(values, vec![0, 2, 4]);

        for (key, value) in arena.iter() {
            assert_eq!(arena.get(key), Some(value));
        }

        assert_eq!(arena.keys(), vec![keys[0], keys[2], keys[4]]);
        let mut_value = arena.get_mut(keys[2]).unwrap();
        *mut_value = 20;
        assert_eq!(arena.get(keys[2]), Some(&20));
    }
}
