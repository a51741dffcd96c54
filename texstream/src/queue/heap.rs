//! Arena-indexed binary max-heap with a key index.
//!
//! Entries live in an arena of slots; the heap itself is a vector of slot
//! ids. Every entry records its position in the heap so it can be
//! repositioned or removed in O(log n) given its [`QueueHandle`], and a hash
//! map from key to slot gives O(1) lookup by key.
//!
//! Ordering is by priority (descending, `f32::total_cmp`), then by insertion
//! order (older first), which breaks ties consistently.
//!
//! Not thread-safe; [`super::PriorityIndex`] wraps it in a mutex.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

/// Token identifying an entry's slot in the heap.
///
/// Handles carry the slot generation, so a handle kept after its entry was
/// removed never addresses a later entry that reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    slot: u32,
    generation: u32,
}

/// Errors from structural operations on the heap.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IndexError {
    /// The handle's entry was already removed.
    #[error("Stale queue handle")]
    StaleHandle,

    /// An entry with the same key is already queued.
    #[error("Key already queued")]
    DuplicateKey,
}

struct Entry<K, V> {
    key: K,
    value: V,
    priority: f32,
    stamp: u64,
    position: usize,
}

struct Slot<K, V> {
    generation: u32,
    entry: Option<Entry<K, V>>,
}

pub struct IndexedHeap<K, V> {
    slots: Vec<Slot<K, V>>,
    free: Vec<u32>,
    heap: Vec<u32>,
    keys: HashMap<K, u32>,
    next_stamp: u64,
}

impl<K, V> IndexedHeap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            heap: Vec::with_capacity(capacity),
            keys: HashMap::with_capacity(capacity),
            next_stamp: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert a new entry. Keys are unique.
    pub fn insert(&mut self, key: K, value: V, priority: f32) -> Result<QueueHandle, IndexError> {
        if self.keys.contains_key(&key) {
            return Err(IndexError::DuplicateKey);
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let position = self.heap.len();
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        self.keys.insert(key.clone(), slot);
        self.slots[slot as usize].entry = Some(Entry {
            key,
            value,
            priority,
            stamp,
            position,
        });
        self.heap.push(slot);
        self.sift_up(position);

        Ok(QueueHandle {
            slot,
            generation: self.slots[slot as usize].generation,
        })
    }

    /// Remove the entry addressed by `handle`.
    pub fn remove(&mut self, handle: QueueHandle) -> Result<(K, V), IndexError> {
        let position = self.entry(handle)?.position;
        Ok(self.remove_at(position))
    }

    /// Change the priority of the entry addressed by `handle`.
    pub fn update_priority(
        &mut self,
        handle: QueueHandle,
        priority: f32,
    ) -> Result<QueueHandle, IndexError> {
        let entry = self.entry_mut(handle)?;
        let old = entry.priority;
        entry.priority = priority;
        let position = entry.position;

        match priority.total_cmp(&old) {
            Ordering::Greater => self.sift_up(position),
            Ordering::Less => self.sift_down(position),
            Ordering::Equal => {}
        }

        Ok(handle)
    }

    /// Highest-priority entry.
    pub fn peek(&self) -> Option<(QueueHandle, &V)> {
        let slot = *self.heap.first()?;
        let entry = self.slot_entry(slot as usize);
        Some((self.handle_for(slot), &entry.value))
    }

    /// Remove and return the highest-priority entry.
    pub fn pop(&mut self) -> Option<(K, V)> {
        if self.heap.is_empty() {
            None
        } else {
            Some(self.remove_at(0))
        }
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &K) -> Option<(QueueHandle, &V)> {
        let slot = *self.keys.get(key)?;
        let entry = self.slot_entry(slot as usize);
        Some((self.handle_for(slot), &entry.value))
    }

    /// Priority of the entry addressed by `handle`.
    pub fn priority(&self, handle: QueueHandle) -> Option<f32> {
        self.entry(handle).ok().map(|entry| entry.priority)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    /// Remove every entry. Outstanding handles become stale.
    pub fn clear(&mut self) {
        for slot in self.heap.drain(..) {
            let slot_ref = &mut self.slots[slot as usize];
            slot_ref.entry = None;
            slot_ref.generation = slot_ref.generation.wrapping_add(1);
            self.free.push(slot);
        }
        self.keys.clear();
    }

    /// Iterate over values in arbitrary order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.heap
            .iter()
            .map(|slot| &self.slot_entry(*slot as usize).value)
    }

    fn handle_for(&self, slot: u32) -> QueueHandle {
        QueueHandle {
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    fn entry(&self, handle: QueueHandle) -> Result<&Entry<K, V>, IndexError> {
        self.slots
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(IndexError::StaleHandle)
    }

    fn entry_mut(&mut self, handle: QueueHandle) -> Result<&mut Entry<K, V>, IndexError> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(IndexError::StaleHandle)
    }

    // Only called for slots referenced from `heap` or `keys`, which are occupied.
    fn slot_entry(&self, slot: usize) -> &Entry<K, V> {
        match &self.slots[slot].entry {
            Some(entry) => entry,
            None => unreachable!("heap references an empty slot"),
        }
    }

    fn slot_entry_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        match &mut self.slots[slot].entry {
            Some(entry) => entry,
            None => unreachable!("heap references an empty slot"),
        }
    }

    fn remove_at(&mut self, position: usize) -> (K, V) {
        let last = self.heap.len() - 1;
        self.swap(position, last);
        let Some(slot) = self.heap.pop() else {
            unreachable!("remove_at on an empty heap");
        };

        let slot_ref = &mut self.slots[slot as usize];
        let entry = match slot_ref.entry.take() {
            Some(entry) => entry,
            None => unreachable!("heap references an empty slot"),
        };
        slot_ref.generation = slot_ref.generation.wrapping_add(1);
        self.free.push(slot);
        self.keys.remove(&entry.key);

        if position < self.heap.len() {
            self.sift_up(position);
            self.sift_down(position);
        }

        (entry.key, entry.value)
    }

    /// Whether the entry at heap position `a` ranks above the one at `b`.
    fn outranks(&self, a: usize, b: usize) -> bool {
        let a = self.slot_entry(self.heap[a] as usize);
        let b = self.slot_entry(self.heap[b] as usize);
        match a.priority.total_cmp(&b.priority) {
            Ordering::Equal => a.stamp < b.stamp,
            ordering => ordering == Ordering::Greater,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        let slot_a = self.heap[a] as usize;
        let slot_b = self.heap[b] as usize;
        self.slot_entry_mut(slot_a).position = a;
        self.slot_entry_mut(slot_b).position = b;
    }

    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.outranks(position, parent) {
                break;
            }
            self.swap(position, parent);
            position = parent;
        }
    }

    fn sift_down(&mut self, mut position: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * position + 1;
            let right = left + 1;
            let mut best = position;

            if left < len && self.outranks(left, best) {
                best = left;
            }
            if right < len && self.outranks(right, best) {
                best = right;
            }
            if best == position {
                break;
            }
            self.swap(position, best);
            position = best;
        }
    }
}

impl<K, V> Default for IndexedHeap<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(heap: &mut IndexedHeap<u32, &'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| heap.pop().map(|(_, v)| v)).collect()
    }

    #[test]
    fn test_priority_ordering() {
        let mut heap = IndexedHeap::new();

        heap.insert(1, "low", 1.0).unwrap();
        heap.insert(2, "high", 10.0).unwrap();
        heap.insert(3, "mid", 5.0).unwrap();

        assert_eq!(drain(&mut heap), vec!["high", "mid", "low"]);
        assert!(heap.pop().is_none());
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let mut heap = IndexedHeap::new();

        heap.insert(1, "first", 2.0).unwrap();
        heap.insert(2, "second", 2.0).unwrap();
        heap.insert(3, "third", 2.0).unwrap();

        assert_eq!(drain(&mut heap), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut heap = IndexedHeap::new();

        heap.insert(1, "a", 1.0).unwrap();
        assert_eq!(heap.insert(1, "b", 2.0), Err(IndexError::DuplicateKey));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_remove_by_handle() {
        let mut heap = IndexedHeap::new();

        heap.insert(1, "a", 1.0).unwrap();
        let b = heap.insert(2, "b", 3.0).unwrap();
        heap.insert(3, "c", 2.0).unwrap();

        assert_eq!(heap.remove(b), Ok((2, "b")));
        assert_eq!(heap.remove(b), Err(IndexError::StaleHandle));
        assert!(!heap.contains_key(&2));
        assert_eq!(drain(&mut heap), vec!["c", "a"]);
    }

    #[test]
    fn test_stale_handle_does_not_address_reused_slot() {
        let mut heap = IndexedHeap::new();

        let old = heap.insert(1, "old", 1.0).unwrap();
        heap.remove(old).unwrap();
        let new = heap.insert(2, "new", 1.0).unwrap();

        assert_ne!(old, new);
        assert_eq!(heap.update_priority(old, 9.0), Err(IndexError::StaleHandle));
        assert_eq!(heap.remove(old), Err(IndexError::StaleHandle));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_update_priority_repositions() {
        let mut heap = IndexedHeap::new();

        let a = heap.insert(1, "a", 1.0).unwrap();
        heap.insert(2, "b", 5.0).unwrap();
        let c = heap.insert(3, "c", 3.0).unwrap();

        heap.update_priority(a, 10.0).unwrap();
        assert_eq!(heap.peek().map(|(_, v)| *v), Some("a"));

        heap.update_priority(a, 0.0).unwrap();
        heap.update_priority(c, 6.0).unwrap();
        assert_eq!(heap.priority(c), Some(6.0));
        assert_eq!(drain(&mut heap), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_get_by_key() {
        let mut heap = IndexedHeap::new();

        let handle = heap.insert(7, "seven", 1.0).unwrap();
        assert_eq!(heap.get(&7), Some((handle, &"seven")));
        assert_eq!(heap.get(&8), None);
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut heap = IndexedHeap::new();

        let handle = heap.insert(1, "a", 1.0).unwrap();
        heap.insert(2, "b", 1.0).unwrap();
        heap.clear();

        assert!(heap.is_empty());
        assert!(heap.get(&1).is_none());
        assert_eq!(heap.remove(handle), Err(IndexError::StaleHandle));
        heap.insert(1, "again", 1.0).unwrap();
        assert_eq!(heap.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, i16),
        Update(u8, i16),
        Remove(u8),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<i16>()).prop_map(|(k, p)| Op::Insert(k % 32, p)),
            (any::<u8>(), any::<i16>()).prop_map(|(k, p)| Op::Update(k % 32, p)),
            any::<u8>().prop_map(|k| Op::Remove(k % 32)),
            Just(Op::Pop),
        ]
    }

    proptest! {
        #[test]
        fn prop_peek_is_always_maximal(ops in prop::collection::vec(op(), 1..200)) {
            let mut heap: IndexedHeap<u8, u8> = IndexedHeap::new();
            let mut model: HashMap<u8, f32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(k, p) => {
                        let inserted = heap.insert(k, k, p as f32).is_ok();
                        prop_assert_eq!(inserted, !model.contains_key(&k));
                        model.entry(k).or_insert(p as f32);
                    }
                    Op::Update(k, p) => {
                        if let Some((handle, _)) = heap.get(&k) {
                            heap.update_priority(handle, p as f32).unwrap();
                            model.insert(k, p as f32);
                        }
                    }
                    Op::Remove(k) => {
                        if let Some((handle, _)) = heap.get(&k) {
                            heap.remove(handle).unwrap();
                            model.remove(&k);
                        }
                    }
                    Op::Pop => {
                        let popped = heap.pop().map(|(k, _)| k);
                        if let Some(k) = popped {
                            let max = model.values().cloned().fold(f32::MIN, f32::max);
                            prop_assert_eq!(model.remove(&k), Some(max));
                        } else {
                            prop_assert!(model.is_empty());
                        }
                    }
                }

                prop_assert_eq!(heap.len(), model.len());
                if let Some((_, k)) = heap.peek() {
                    let max = model.values().cloned().fold(f32::MIN, f32::max);
                    prop_assert_eq!(model[k], max);
                }
            }
        }
    }
}
