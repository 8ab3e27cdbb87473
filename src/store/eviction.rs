// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// LRU over sealed, unpinned objects. Entries join the list when
// their refcount drops to zero and leave it the moment they're pinned
// again or deleted; `Evict(num_bytes)` walks from the least-recently-used
// end.

use indexmap::IndexSet;

use crate::object_id::ObjectId;

/// Ordered set of evictable object ids, oldest-first. Backed by
/// `IndexSet` so both "is this id evictable" and "who's next" are O(1)
/// amortized, avoiding a hand-rolled intrusive linked list.
#[derive(Default)]
pub struct EvictionList {
    lru: IndexSet<ObjectId>,
}

impl EvictionList {
    pub fn new() -> Self {
        Self {
            lru: IndexSet::new(),
        }
    }

    /// Mark `id` evictable (its refcount just reached zero while sealed).
    pub fn mark_evictable(&mut self, id: ObjectId) {
        self.lru.insert(id);
    }

    /// Remove `id` from the evictable set (it was just pinned again, or
    /// deleted directly).
    pub fn unmark(&mut self, id: &ObjectId) {
        self.lru.shift_remove(id);
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.lru.contains(id)
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Pop the single least-recently-used id, if any. The caller (the
    /// store) takes the table's per-entry lock equivalent by doing this
    /// removal and the corresponding table delete as one atomic step
    /// within the single-threaded event loop (tie-break note: no
    /// concurrent eviction selection can race a repin here because
    /// everything runs on one thread).
    pub fn pop_lru(&mut self) -> Option<ObjectId> {
        if self.lru.is_empty() {
            return None;
        }
        Some(self.lru.shift_remove_index(0).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> ObjectId {
        ObjectId::new([b; crate::object_id::ID_SIZE])
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut l = EvictionList::new();
        l.mark_evictable(id(1));
        l.mark_evictable(id(2));
        l.mark_evictable(id(3));
        assert_eq!(l.pop_lru(), Some(id(1)));
        assert_eq!(l.pop_lru(), Some(id(2)));
    }

    #[test]
    fn unmark_removes_from_candidate_set() {
        let mut l = EvictionList::new();
        l.mark_evictable(id(1));
        l.mark_evictable(id(2));
        l.unmark(&id(1));
        assert!(!l.contains(&id(1)));
        assert_eq!(l.pop_lru(), Some(id(2)));
        assert!(l.is_empty());
    }
}
