//! Mutable-priority index over active transfers.
//!
//! [`PriorityIndex`] is the thread-safe face of [`IndexedHeap`]: every
//! structural operation takes a single mutex for the duration of the
//! mutation only. Nothing blocking happens under the lock, and values are
//! handed out as clones (transfers are `Arc`s) so callers never hold the
//! index lock while working on an entry.
//!
//! # Example
//!
//! ```
//! use texstream::queue::PriorityIndex;
//!
//! let index = PriorityIndex::new();
//! index.insert("t1", "texture one", 5.0).unwrap();
//! let t2 = index.insert("t2", "texture two", 10.0).unwrap();
//! assert_eq!(index.peek_max(), Some("texture two"));
//!
//! assert!(index.delete(t2));
//! assert_eq!(index.peek_max(), Some("texture one"));
//! assert_eq!(index.count(), 1);
//! ```

mod heap;

pub use heap::{IndexError, IndexedHeap, QueueHandle};

use std::hash::Hash;

use parking_lot::Mutex;
use tracing::warn;

use crate::transfer::{SharedTransfer, TextureId};

/// The per-client index of live transfers.
pub type TransferIndex = PriorityIndex<TextureId, SharedTransfer>;

/// Max-ordered index with O(log n) insert/update/delete and O(1) lookups.
pub struct PriorityIndex<K, V> {
    inner: Mutex<IndexedHeap<K, V>>,
}

impl<K, V> PriorityIndex<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexedHeap::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(IndexedHeap::with_capacity(capacity)),
        }
    }

    /// Insert a new entry; fails if the key is already queued.
    pub fn insert(&self, key: K, value: V, priority: f32) -> Result<QueueHandle, IndexError> {
        self.inner.lock().insert(key, value, priority)
    }

    /// Delete by handle. A stale handle is a no-op and returns `false`.
    pub fn delete(&self, handle: QueueHandle) -> bool {
        self.inner.lock().remove(handle).is_ok()
    }

    /// Reposition an entry under a new priority.
    ///
    /// If `handle` no longer addresses an entry, the value is re-inserted
    /// under `key` so the item is never lost. Callers must only do this for
    /// values that are still live.
    pub fn update_key(
        &self,
        handle: QueueHandle,
        key: K,
        value: V,
        priority: f32,
    ) -> Result<QueueHandle, IndexError> {
        let (result, reinserted) = {
            let mut heap = self.inner.lock();
            match heap.update_priority(handle, priority) {
                Ok(handle) => (Ok(handle), false),
                Err(_) => {
                    if let Some((existing, _)) = heap.get(&key) {
                        let _ = heap.remove(existing);
                    }
                    (heap.insert(key, value, priority), true)
                }
            }
        };

        if reinserted {
            warn!(priority, "Queue handle was stale, entry re-inserted");
        }
        result
    }

    /// Highest-priority value.
    pub fn peek_max(&self) -> Option<V> {
        self.inner.lock().peek().map(|(_, value)| value.clone())
    }

    /// Remove and return the highest-priority value.
    pub fn pop_max(&self) -> Option<V> {
        self.inner.lock().pop().map(|(_, value)| value)
    }

    /// Number of queued entries.
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Look up a value by key.
    pub fn find_by_key(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).map(|(_, value)| value.clone())
    }

    /// Remove every entry, returning the removed values.
    pub fn clear(&self) -> Vec<V> {
        let mut heap = self.inner.lock();
        let values = heap.values().cloned().collect();
        heap.clear();
        values
    }

    /// Current priority of the entry addressed by `handle`.
    pub fn priority_of(&self, handle: QueueHandle) -> Option<f32> {
        self.inner.lock().priority(handle)
    }
}

impl<K, V> Default for PriorityIndex<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for PriorityIndex<K, V>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityIndex")
            .field("len", &self.inner.lock().len())
            .finish()
    }
}
