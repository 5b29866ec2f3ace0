//! Thread-safe wrapper built from a meta-table `RwLock` plus the
//! per-leaf `Mutex` already built into [`Arena`] — the same two-tier
//! granularity as the teacher's `LockManager`
//! (`xtrieve-engine/src/file_manager/locking.rs`): an outer lock guards
//! which resources exist, an inner lock per resource guards its
//! content. Two `put`s into different leaves only ever contend on the
//! (shared, cheap) meta/arena-shape read locks; they never block each
//! other on leaf content.

use std::cmp::Ordering;

use parking_lot::RwLock;

use crate::error::WormholeResult;
use crate::key::{compare_anchor_keys, SMALLEST_TOKEN};
use crate::leaf::{Arena, Entry, LeafId, LeafNode};
use crate::meta::{Bitmap256, MetaTrieHashTable, NodeMeta};
use crate::wormhole::{self, WormholeConfig};

/// A [`crate::wormhole::Wormhole`]-equivalent index safe to share across
/// threads.
///
/// `table` guards the meta trie and `arena` guards only the arena's
/// *shape* (which [`LeafId`]s exist) — both change together during a
/// split or merge, which is why one `RwLock` covers both rather than
/// inviting a lock-ordering bug between two. Each leaf's own content
/// sits behind its own `Mutex`, reached through [`Arena::get`]/
/// [`Arena::get_mut`] once a read lock on `arena` has resolved an id:
/// ordinary `get`/`put` (no split) and concurrent `get`s on different
/// leaves only ever take read locks, so they interleave freely; only
/// the rare split/merge path needs the write lock.
pub struct ConcurrentWormhole<V> {
    table: RwLock<MetaTrieHashTable>,
    arena: RwLock<Arena<V>>,
    #[allow(dead_code)]
    root: LeafId,
    leaf_size: usize,
    merge_threshold: usize,
    debug_mode: bool,
}

impl<V> ConcurrentWormhole<V> {
    /// Wrap a fresh index with the given leaf capacity.
    pub fn new(leaf_size: usize, debug_mode: bool) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(LeafNode::new(vec![SMALLEST_TOKEN], leaf_size, None, None));

        let mut table = MetaTrieHashTable::new();
        table.put(vec![SMALLEST_TOKEN], NodeMeta::Leaf(root));
        table.put(vec![], NodeMeta::Internal {
            bitmap: Bitmap256::with_bit(SMALLEST_TOKEN),
            leftmost: root,
            rightmost: root,
        });

        ConcurrentWormhole {
            table: RwLock::new(table),
            arena: RwLock::new(arena),
            root,
            leaf_size,
            merge_threshold: (3 * leaf_size) / 4,
            debug_mode,
        }
    }

    fn check_invariants_if_debug(&self) {
        if !self.debug_mode {
            return;
        }
        let table = self.table.read();
        let arena = self.arena.read();
        if let Err(e) = wormhole::validate_invariants(&table, &arena, self.leaf_size) {
            tracing::error!(error = %e, "wormhole invariant violation");
            panic!("{e}");
        }
    }

    /// Number of entries a leaf may hold before it must split.
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Look up `key`, cloning the value out from under the leaf's own
    /// lock. Only ever takes read locks, so concurrent `get`s never
    /// block one another, even on the same leaf.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        let table = self.table.read();
        let arena = self.arena.read();
        let leaf_id = wormhole::locate_leaf(&table, &arena, key);
        arena.get(leaf_id).point_search(key).map(|e| e.value.clone())
    }

    /// Insert or overwrite `key`. Takes only read locks on the shared
    /// structures unless the target leaf is full, in which case it
    /// re-locates under a write lock and performs the split there.
    pub fn put(&self, key: Vec<u8>, value: V) {
        {
            let table = self.table.read();
            let arena = self.arena.read();
            let leaf_id = wormhole::locate_leaf(&table, &arena, &key);

            if arena.get(leaf_id).point_search(&key).is_some() {
                let mut leaf = arena.get_mut(leaf_id);
                let idx = leaf.entries().iter().position(|e| e.key == key).expect("just found above");
                leaf.set_value(idx, value);
                return;
            }

            if !arena.get(leaf_id).is_full() {
                arena.get_mut(leaf_id).add(key, value);
                drop(arena);
                drop(table);
                self.check_invariants_if_debug();
                return;
            }
        }

        // The leaf was full: upgrade to exclusive access and split.
        // Re-locate under the write lock in case another writer split
        // or merged this leaf in the meantime.
        let mut table = self.table.write();
        let mut arena = self.arena.write();
        let leaf_id = wormhole::locate_leaf(&table, &arena, &key);

        if arena.get(leaf_id).point_search(&key).is_some() {
            let mut leaf = arena.get_mut(leaf_id);
            let idx = leaf.entries().iter().position(|e| e.key == key).expect("just found above");
            leaf.set_value(idx, value);
            return;
        }

        if !arena.get(leaf_id).is_full() {
            arena.get_mut(leaf_id).add(key, value);
            drop(arena);
            drop(table);
            self.check_invariants_if_debug();
            return;
        }

        let new_id = wormhole::split(&mut table, &mut arena, leaf_id).expect("split must succeed for a well-formed leaf");
        let new_anchor = arena.get(new_id).anchor_key.clone();
        let target = if compare_anchor_keys(&key, &new_anchor) == Ordering::Less { leaf_id } else { new_id };
        arena.get_mut(target).add(key, value);
        drop(arena);
        drop(table);
        self.check_invariants_if_debug();
    }

    /// Remove `key` if present, triggering a merge if either neighbor
    /// would fall below `merge_threshold`. Always takes the write lock:
    /// deletion may shrink a leaf below the threshold and fold it into
    /// a neighbor, mutating the arena's shape.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut table = self.table.write();
        let mut arena = self.arena.write();
        let leaf_id = wormhole::locate_leaf(&table, &arena, key);
        if !arena.get_mut(leaf_id).delete(key) {
            return false;
        }

        let size = arena.get(leaf_id).size();
        if let Some(left_id) = arena.get(leaf_id).left {
            if size + arena.get(left_id).size() < self.merge_threshold {
                wormhole::merge(&mut table, &mut arena, left_id, leaf_id);
                drop(arena);
                drop(table);
                self.check_invariants_if_debug();
                return true;
            }
        }
        if let Some(right_id) = arena.get(leaf_id).right {
            if size + arena.get(right_id).size() < self.merge_threshold {
                wormhole::merge(&mut table, &mut arena, leaf_id, right_id);
            }
        }
        drop(arena);
        drop(table);
        self.check_invariants_if_debug();
        true
    }

    /// Iterate entries in `[start_key, end_key)` (or `(start_key,
    /// end_key]` if `end_exclusive` is false), holding only a read lock
    /// on the shared structures for the duration of the walk.
    pub fn scan<F>(&self, start_key: Option<&[u8]>, end_key: Option<&[u8]>, end_exclusive: bool, mut f: F)
    where
        F: FnMut(&Entry<V>) -> bool,
    {
        let table = self.table.read();
        let arena = self.arena.read();

        let mut leaf_id = match start_key {
            Some(k) => wormhole::locate_leaf(&table, &arena, k),
            None => wormhole::locate_leaf(&table, &arena, &[SMALLEST_TOKEN]),
        };
        let mut first = true;

        loop {
            let mut leaf = arena.get_mut(leaf_id);
            let bound = if first { start_key } else { None };
            let keep_going = leaf.iterate(bound, end_key, end_exclusive, &mut f);
            first = false;
            if !keep_going {
                return;
            }
            match leaf.right {
                Some(next) => leaf_id = next,
                None => return,
            }
        }
    }

    /// Collect the first `count` entries with key `>= start_key`.
    pub fn scan_with_count(&self, start_key: &[u8], count: usize) -> Vec<(Vec<u8>, V)>
    where
        V: Clone,
    {
        let mut out = Vec::with_capacity(count);
        self.scan(Some(start_key), None, false, |e| {
            out.push((e.key.clone(), e.value.clone()));
            out.len() < count
        });
        out
    }

    /// Number of live leaves, mainly useful for tests and metrics.
    pub fn leaf_count(&self) -> usize {
        self.arena.read().iter().count()
    }

    /// Run the structural validator regardless of `debug_mode`.
    pub fn validate(&self) -> WormholeResult<()> {
        wormhole::validate_invariants(&self.table.read(), &self.arena.read(), self.leaf_size)
    }
}

impl WormholeConfig {
    /// Build a [`ConcurrentWormhole`] instead of the unsynchronized core.
    pub fn build_concurrent<V>(self) -> ConcurrentWormhole<V> {
        ConcurrentWormhole::new(self.leaf_size, self.debug_mode)
    }
}
