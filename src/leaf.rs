//! Bounded-capacity leaf node: entry vector, hash-tag index, and an
//! incrementally sorted key-reference index.
//!
//! Leaves never own their siblings directly — they hold stable
//! [`LeafId`] indices into the arena the [`crate::wormhole::Wormhole`]
//! owns. This sidesteps `Rc<RefCell<_>>` sibling cycles entirely (see
//! DESIGN.md, "Cyclic references").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::key::SMALLEST_TOKEN;

/// Stable index of a leaf within a [`crate::wormhole::Wormhole`]'s arena.
pub type LeafId = usize;

/// The 15-bit hash tag used to accelerate `point_search`.
pub fn hash16(key: &[u8]) -> u16 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() & 0x7FFF) as u16
}

/// A single `(key, value)` pair.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub key: Vec<u8>,
    pub value: V,
}

/// A bounded-capacity leaf in the sibling chain.
#[derive(Debug)]
pub struct LeafNode<V> {
    /// Immutable anchor defining this leaf's half-open key range.
    pub anchor_key: Vec<u8>,
    /// Maximum number of entries this leaf may hold.
    pub max_size: usize,
    /// Entries in insertion order — *not* sorted.
    entries: Vec<Entry<V>>,
    /// `(hash16, entry_index)` pairs, always sorted by hash.
    tags: Vec<(u16, usize)>,
    /// Indices into `entries`; `[0, sorted_count)` sorted by key,
    /// `[sorted_count, len)` unsorted.
    key_refs: Vec<usize>,
    sorted_count: usize,
    pub left: Option<LeafId>,
    pub right: Option<LeafId>,
}

impl<V> LeafNode<V> {
    /// Create a new, empty leaf anchored at `anchor_key`.
    pub fn new(anchor_key: Vec<u8>, max_size: usize, left: Option<LeafId>, right: Option<LeafId>) -> Self {
        LeafNode {
            anchor_key,
            max_size,
            entries: Vec::with_capacity(max_size),
            tags: Vec::with_capacity(max_size),
            key_refs: Vec::with_capacity(max_size),
            sorted_count: 0,
            left,
            right,
        }
    }

    /// Number of entries currently stored.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether this leaf has reached `max_size`.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Read-only access to the entry vector (insertion order).
    pub fn entries(&self) -> &[Entry<V>] {
        &self.entries
    }

    /// `sorted_count`, exposed for invariant checks (I3).
    pub fn sorted_count(&self) -> usize {
        self.sorted_count
    }

    /// Binary-search the hash-sorted tag array, estimator-seeded per
    /// §4.2, and return the matching entry if present. Never mutates.
    pub fn point_search(&self, key: &[u8]) -> Option<&Entry<V>> {
        let n = self.tags.len();
        if n == 0 {
            return None;
        }
        let h = hash16(key);

        let mut i = ((h as usize) * n / 0x8000).min(n - 1);
        while i > 0 && self.tags[i - 1].0 >= h {
            i -= 1;
        }
        while i < n && self.tags[i].0 < h {
            i += 1;
        }
        while i < n && self.tags[i].0 == h {
            let idx = self.tags[i].1;
            if self.entries[idx].key == key {
                return Some(&self.entries[idx]);
            }
            i += 1;
        }
        None
    }

    /// Append an entry. Caller guarantees `size() < max_size` and that
    /// `key` is absent (checked via `point_search`).
    pub fn add(&mut self, key: Vec<u8>, value: V) {
        let idx = self.entries.len();
        let h = hash16(&key);
        self.entries.push(Entry { key, value });

        let pos = self.tags.partition_point(|&(th, _)| th < h);
        self.tags.insert(pos, (h, idx));

        // New ref goes into the unsorted tail; sorted_count is untouched.
        self.key_refs.push(idx);
    }

    /// Sort the unsorted tail by key, then merge with the sorted prefix.
    /// Idempotent.
    pub fn inc_sort(&mut self) {
        let n = self.key_refs.len();
        if self.sorted_count == n {
            return;
        }
        self.key_refs[self.sorted_count..].sort_by(|&a, &b| self.entries[a].key.cmp(&self.entries[b].key));

        let mut merged = Vec::with_capacity(n);
        let (mut i, mut j) = (0, self.sorted_count);
        while i < self.sorted_count && j < n {
            if self.entries[self.key_refs[i]].key <= self.entries[self.key_refs[j]].key {
                merged.push(self.key_refs[i]);
                i += 1;
            } else {
                merged.push(self.key_refs[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&self.key_refs[i..self.sorted_count]);
        merged.extend_from_slice(&self.key_refs[j..n]);

        self.key_refs = merged;
        self.sorted_count = n;
    }

    /// The key at sorted position `pos`. Precondition: `inc_sort` has
    /// just been called, so `sorted_count == size()`.
    pub fn sorted_key(&self, pos: usize) -> &[u8] {
        debug_assert_eq!(self.sorted_count, self.entries.len(), "sorted_key requires a fully sorted leaf");
        &self.entries[self.key_refs[pos]].key
    }

    /// Overwrite the value at entry index `idx` (insertion-order index,
    /// as returned by `entries()`), leaving keys, tags and key_refs
    /// untouched.
    pub fn set_value(&mut self, idx: usize, value: V) {
        self.entries[idx].value = value;
    }

    /// Binary-search the fully sorted `key_refs` for `key`, returning its
    /// position in `key_refs` if present.
    fn sorted_position(&self, key: &[u8]) -> Result<usize, usize> {
        debug_assert_eq!(self.sorted_count, self.key_refs.len());
        self.key_refs.binary_search_by(|&idx| self.entries[idx].key.as_slice().cmp(key))
    }

    /// Remove `key` if present. Calls `inc_sort()` first. O(N).
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.inc_sort();
        let pos = match self.sorted_position(key) {
            Ok(pos) => pos,
            Err(_) => return false,
        };
        let entry_idx = self.key_refs.remove(pos);
        self.sorted_count -= 1;
        self.entries.remove(entry_idx);

        let h = hash16(key);
        let tag_pos = self.tags.iter().position(|&(th, ti)| th == h && ti == entry_idx)
            .expect("tag index consistent with entries (I2)");
        self.tags.remove(tag_pos);

        // Every remaining entry index past entry_idx just shifted down by one.
        for &mut (_, ref mut idx) in &mut self.tags {
            if *idx > entry_idx {
                *idx -= 1;
            }
        }
        for idx in &mut self.key_refs {
            if *idx > entry_idx {
                *idx -= 1;
            }
        }
        true
    }

    /// Split off `key_refs[start_ref_index..]` (and their entries) into a
    /// new leaf anchored at `new_anchor`. Precondition: `sorted_count ==
    /// size()`. `self_id` is this leaf's own arena id, used to set the
    /// new leaf's `left` pointer; the caller (Wormhole) is responsible
    /// for relinking `self.right` and the old right sibling's `left`.
    pub fn split_to_new_leaf(&mut self, new_anchor: Vec<u8>, start_ref_index: usize, self_id: LeafId) -> LeafNode<V> {
        debug_assert_eq!(self.sorted_count, self.entries.len(), "split requires a fully sorted leaf");

        let moved_refs = self.key_refs.split_off(start_ref_index);
        let moved_indices: std::collections::HashSet<usize> = moved_refs.iter().copied().collect();

        // Partition entries by whether their index was moved, preserving
        // relative order within each half, and remap indices.
        let mut kept_entries = Vec::with_capacity(self.entries.len() - moved_refs.len());
        let mut moved_entries = Vec::with_capacity(moved_refs.len());
        let mut remap = vec![0usize; self.entries.len()];
        for (old_idx, entry) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if moved_indices.contains(&old_idx) {
                remap[old_idx] = moved_entries.len();
                moved_entries.push(entry);
            } else {
                remap[old_idx] = kept_entries.len();
                kept_entries.push(entry);
            }
        }
        self.entries = kept_entries;

        let new_key_refs: Vec<usize> = moved_refs.iter().map(|&old| remap[old]).collect();
        self.key_refs.iter_mut().for_each(|r| *r = remap[*r]);
        self.sorted_count = self.key_refs.len();

        self.tags = self.entries.iter().enumerate().map(|(i, e)| (hash16(&e.key), i)).collect();
        self.tags.sort_by_key(|&(h, _)| h);

        let mut new_tags: Vec<(u16, usize)> = moved_entries.iter().enumerate().map(|(i, e)| (hash16(&e.key), i)).collect();
        new_tags.sort_by_key(|&(h, _)| h);

        let mut new_leaf = LeafNode {
            anchor_key: new_anchor,
            max_size: self.max_size,
            entries: moved_entries,
            tags: new_tags,
            key_refs: new_key_refs,
            sorted_count: moved_refs.len(),
            left: Some(self_id),
            right: self.right,
        };
        new_leaf.sorted_count = new_leaf.key_refs.len();
        new_leaf
    }

    /// Absorb `right`'s entries/tags/key_refs into `self`. The merged
    /// `key_refs` is `[sorted_prefix ∪ unsorted_tail]` and may need a
    /// subsequent `inc_sort`. Does not touch sibling links — the caller
    /// relinks `self.right` and any downstream `left` pointer.
    pub fn merge_from(&mut self, right: LeafNode<V>) {
        let offset = self.entries.len();
        self.entries.extend(right.entries);

        self.tags.extend(right.tags.into_iter().map(|(h, i)| (h, i + offset)));
        self.tags.sort_by_key(|&(h, _)| h);

        // Right's sorted prefix, then its unsorted tail, both offset —
        // appended after our own tail so the combined array keeps the
        // "[sorted ∪ unsorted]" shape (our own unsorted tail, if any,
        // now sits before right's refs; sorted_count stays as ours).
        self.key_refs.extend(right.key_refs.into_iter().map(|i| i + offset));
    }

    /// Iterate entries from `start_key` (inclusive, or the first entry
    /// if `None`) up to `end_key`, calling `f` for each. Returns `true`
    /// if iteration should continue into the right sibling (end of this
    /// leaf reached without satisfying `end_key`), `false` if the scan
    /// is done (either `end_key` was reached or `f` returned `false`).
    pub fn iterate<F>(&mut self, start_key: Option<&[u8]>, end_key: Option<&[u8]>, end_exclusive: bool, mut f: F) -> bool
    where
        F: FnMut(&Entry<V>) -> bool,
    {
        self.inc_sort();
        let start_pos = match start_key {
            Some(k) => self.key_refs.partition_point(|&idx| self.entries[idx].key.as_slice() < k),
            None => 0,
        };

        for &idx in &self.key_refs[start_pos..] {
            let entry = &self.entries[idx];
            if let Some(end) = end_key {
                let past_end = if end_exclusive {
                    entry.key.as_slice() >= end
                } else {
                    entry.key.as_slice() > end
                };
                if past_end {
                    return false;
                }
            }
            if !f(entry) {
                return false;
            }
        }
        true
    }
}

/// Whether `anchor` carries the trailing smallest-token marker.
pub fn ends_with_smallest_token(anchor: &[u8]) -> bool {
    anchor.last() == Some(&SMALLEST_TOKEN)
}

/// Owns every [`LeafNode`] by stable [`LeafId`], each behind its own
/// `Mutex` so unrelated leaves never contend with one another. The meta
/// trie only ever stores ids into this arena — sidesteps `Rc<RefCell<_>>`
/// sibling cycles (DESIGN.md, "Cyclic references") and, combined with
/// per-leaf locking, lets [`crate::concurrent::ConcurrentWormhole`]
/// interleave operations on different leaves instead of serializing on
/// one coarse lock (mirroring the teacher's per-resource `Mutex` behind
/// a structural `RwLock`).
#[derive(Debug, Default)]
pub struct Arena<V> {
    slots: Vec<Option<Arc<Mutex<LeafNode<V>>>>>,
}

impl<V> Arena<V> {
    pub fn new() -> Self {
        Arena { slots: Vec::new() }
    }

    pub fn insert(&mut self, leaf: LeafNode<V>) -> LeafId {
        self.slots.push(Some(Arc::new(Mutex::new(leaf))));
        self.slots.len() - 1
    }

    /// Lock and return a guard for the leaf at `id`. The same guard type
    /// serves both read and write access — `parking_lot::Mutex` has no
    /// separate shared-guard variant.
    pub fn get(&self, id: LeafId) -> MutexGuard<'_, LeafNode<V>> {
        self.slots[id].as_ref().expect("leaf id refers to a live leaf").lock()
    }

    /// Alias of [`Arena::get`], kept for call sites that read more
    /// naturally as a mutable access.
    pub fn get_mut(&self, id: LeafId) -> MutexGuard<'_, LeafNode<V>> {
        self.get(id)
    }

    /// Clone the `Arc` guarding the leaf at `id`, for callers (the
    /// concurrent wrapper) that need to release a coarse lock on the
    /// arena's shape before locking the individual leaf.
    pub fn arc(&self, id: LeafId) -> Arc<Mutex<LeafNode<V>>> {
        self.slots[id].as_ref().expect("leaf id refers to a live leaf").clone()
    }

    /// Remove and return the leaf at `id`, freeing its slot. Panics if
    /// another `Arc` clone (from [`Arena::arc`]) is still outstanding —
    /// callers must not hold one across a merge.
    pub fn remove(&mut self, id: LeafId) -> LeafNode<V> {
        let arc = self.slots[id].take().expect("leaf id refers to a live leaf");
        Arc::try_unwrap(arc).unwrap_or_else(|_| panic!("leaf {id} removed while still referenced")).into_inner()
    }

    /// Upper bound on valid ids — used by the debug-mode validator to
    /// sanity-check `NodeMeta` leaf references.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over currently-live leaves (skips removed/merged slots),
    /// locking each in turn.
    pub fn iter(&self) -> impl Iterator<Item = (LeafId, MutexGuard<'_, LeafNode<V>>)> {
        self.slots.iter().enumerate().filter_map(|(id, slot)| slot.as_ref().map(|l| (id, l.lock())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> LeafNode<i32> {
        LeafNode::new(vec![], 8, None, None)
    }

    #[test]
    fn add_and_point_search() {
        let mut l = leaf();
        l.add(b"B".to_vec(), 2);
        l.add(b"A".to_vec(), 1);
        l.add(b"C".to_vec(), 3);
        assert_eq!(l.point_search(b"A").map(|e| e.value), Some(1));
        assert_eq!(l.point_search(b"B").map(|e| e.value), Some(2));
        assert_eq!(l.point_search(b"C").map(|e| e.value), Some(3));
        assert!(l.point_search(b"Z").is_none());
    }

    #[test]
    fn inc_sort_is_idempotent_and_orders_key_refs() {
        let mut l = leaf();
        for (k, v) in [("D", 4), ("B", 2), ("A", 1), ("C", 3)] {
            l.add(k.as_bytes().to_vec(), v);
        }
        l.inc_sort();
        let first_pass: Vec<u8> = l.key_refs.iter().map(|&i| l.entries[i].key[0]).collect();
        l.inc_sort();
        let second_pass: Vec<u8> = l.key_refs.iter().map(|&i| l.entries[i].key[0]).collect();
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass, vec![b'A', b'B', b'C', b'D']);
        assert_eq!(l.sorted_count(), 4);
    }

    #[test]
    fn delete_removes_entry_and_keeps_indices_consistent() {
        let mut l = leaf();
        for (k, v) in [("A", 1), ("B", 2), ("C", 3)] {
            l.add(k.as_bytes().to_vec(), v);
        }
        assert!(l.delete(b"B"));
        assert!(!l.delete(b"B"));
        assert_eq!(l.size(), 2);
        assert_eq!(l.point_search(b"A").map(|e| e.value), Some(1));
        assert_eq!(l.point_search(b"C").map(|e| e.value), Some(3));
        assert!(l.point_search(b"B").is_none());
    }

    #[test]
    fn split_partitions_entries_by_ref_index() {
        let mut l = leaf();
        for (k, v) in [("A", 1), ("B", 2), ("C", 3), ("D", 4)] {
            l.add(k.as_bytes().to_vec(), v);
        }
        l.inc_sort();
        let new_leaf = l.split_to_new_leaf(b"C".to_vec(), 2, 0);
        assert_eq!(l.size(), 2);
        assert_eq!(new_leaf.size(), 2);
        assert_eq!(l.point_search(b"A").map(|e| e.value), Some(1));
        assert_eq!(l.point_search(b"B").map(|e| e.value), Some(2));
        assert_eq!(new_leaf.point_search(b"C").map(|e| e.value), Some(3));
        assert_eq!(new_leaf.point_search(b"D").map(|e| e.value), Some(4));
        assert_eq!(new_leaf.left, Some(0));
    }

    #[test]
    fn merge_from_absorbs_right_entries() {
        let mut l = leaf();
        l.add(b"A".to_vec(), 1);
        l.inc_sort();
        let mut right = LeafNode::new(b"B".to_vec(), 8, Some(0), None);
        right.add(b"B".to_vec(), 2);
        l.merge_from(right);
        l.inc_sort();
        assert_eq!(l.size(), 2);
        assert_eq!(l.point_search(b"A").map(|e| e.value), Some(1));
        assert_eq!(l.point_search(b"B").map(|e| e.value), Some(2));
    }

    #[test]
    fn iterate_respects_bounds() {
        let mut l = leaf();
        for (k, v) in [("A", 1), ("B", 2), ("C", 3), ("D", 4)] {
            l.add(k.as_bytes().to_vec(), v);
        }
        let mut seen = Vec::new();
        l.iterate(Some(b"B"), Some(b"D"), true, |e| {
            seen.push(e.key.clone());
            true
        });
        assert_eq!(seen, vec![b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn iterate_stops_when_visitor_returns_false() {
        let mut l = leaf();
        for (k, v) in [("A", 1), ("B", 2), ("C", 3)] {
            l.add(k.as_bytes().to_vec(), v);
        }
        let mut count = 0;
        l.iterate(None, None, false, |_| {
            count += 1;
            count < 2
        });
        assert_eq!(count, 2);
    }
}
