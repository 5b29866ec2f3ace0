//! The orchestrator that binds the meta trie to the leaf chain: routes
//! `put`/`get`/`delete`/`scan` to the owning leaf, and drives split/merge
//! when a leaf overflows or under-fills (§4.4).
//!
//! The core logic lives in free functions parameterized over
//! `&MetaTrieHashTable`/`&Arena<V>` so [`crate::concurrent::ConcurrentWormhole`]
//! can drive the same split/merge/locate code under its own lock guards
//! instead of duplicating it.

use std::cmp::Ordering;

use crate::error::{WormholeError, WormholeResult};
use crate::key::{anchor_leq_key, compare_anchor_keys, key_lt_anchor, longest_common_prefix, SMALLEST_TOKEN};
use crate::leaf::{Arena, Entry, LeafId, LeafNode};
use crate::meta::{MetaTrieHashTable, NodeMeta};

/// Default leaf capacity, matching the source's default.
pub const DEFAULT_LEAF_SIZE: usize = 128;

/// Builder for named construction of a [`Wormhole`] (or, via
/// [`crate::concurrent::ConcurrentWormhole`]'s own extension, a
/// concurrent one) without remembering positional `new()` arguments.
#[derive(Debug, Clone)]
pub struct WormholeConfig {
    pub(crate) leaf_size: usize,
    pub(crate) debug_mode: bool,
}

impl Default for WormholeConfig {
    fn default() -> Self {
        WormholeConfig { leaf_size: DEFAULT_LEAF_SIZE, debug_mode: false }
    }
}

impl WormholeConfig {
    pub fn new() -> Self {
        WormholeConfig::default()
    }

    /// Maximum entries a leaf holds before it must split.
    pub fn leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    /// Whether to run the structural validator after every mutation.
    pub fn debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn build<V>(self) -> Wormhole<V> {
        Wormhole::new(self.leaf_size, self.debug_mode)
    }
}

/// In-memory ordered key-value index (see SPEC_FULL.md §4.4).
pub struct Wormhole<V> {
    arena: Arena<V>,
    table: MetaTrieHashTable,
    root: LeafId,
    leaf_size: usize,
    merge_threshold: usize,
    debug_mode: bool,
}

impl<V> Wormhole<V> {
    /// Create a new, empty index with the given leaf capacity.
    pub fn new(leaf_size: usize, debug_mode: bool) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(LeafNode::new(vec![SMALLEST_TOKEN], leaf_size, None, None));

        let mut table = MetaTrieHashTable::new();
        table.put(vec![SMALLEST_TOKEN], NodeMeta::Leaf(root));
        table.put(vec![], NodeMeta::Internal {
            bitmap: crate::meta::Bitmap256::with_bit(SMALLEST_TOKEN),
            leftmost: root,
            rightmost: root,
        });

        Wormhole {
            arena,
            table,
            root,
            leaf_size,
            merge_threshold: (3 * leaf_size) / 4,
            debug_mode,
        }
    }

    /// Number of entries a leaf may hold before it must split.
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Number of live leaves currently in the sibling chain. O(leaves).
    pub fn leaf_count(&self) -> usize {
        self.arena.iter().count()
    }

    fn check_invariants_if_debug(&self) {
        if !self.debug_mode {
            return;
        }
        if let Err(e) = validate_invariants(&self.table, &self.arena, self.leaf_size) {
            tracing::error!(error = %e, "wormhole invariant violation");
            panic!("{e}");
        }
    }

    /// Look up `key`. O(log K) meta navigation + O(log L) leaf search.
    /// Returns a clone since the value lives behind the leaf's own
    /// `Mutex` and cannot be handed out by reference.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        let leaf_id = locate_leaf(&self.table, &self.arena, key);
        self.arena.get(leaf_id).point_search(key).map(|e| e.value.clone())
    }

    /// Insert or overwrite `key` with `value`.
    pub fn put(&mut self, key: Vec<u8>, value: V) {
        let leaf_id = locate_leaf(&self.table, &self.arena, &key);

        if self.arena.get(leaf_id).point_search(&key).is_some() {
            // Overwrite in place: same entry index, no structural change.
            let mut leaf = self.arena.get_mut(leaf_id);
            let idx = leaf.entries().iter().position(|e| e.key == key).expect("just found above");
            leaf.set_value(idx, value);
            return;
        }

        if !self.arena.get(leaf_id).is_full() {
            self.arena.get_mut(leaf_id).add(key, value);
            self.check_invariants_if_debug();
            return;
        }

        let new_id = split(&mut self.table, &mut self.arena, leaf_id).expect("split must succeed for a well-formed leaf");
        let new_anchor = self.arena.get(new_id).anchor_key.clone();
        let target = if compare_anchor_keys(&key, &new_anchor) == Ordering::Less { leaf_id } else { new_id };
        self.arena.get_mut(target).add(key, value);
        self.check_invariants_if_debug();
    }

    /// Remove `key` if present, triggering a merge if either neighbor
    /// would fall below `merge_threshold`. Returns whether `key` was
    /// present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let leaf_id = locate_leaf(&self.table, &self.arena, key);
        if !self.arena.get_mut(leaf_id).delete(key) {
            return false;
        }

        let size = self.arena.get(leaf_id).size();
        if let Some(left_id) = self.arena.get(leaf_id).left {
            if size + self.arena.get(left_id).size() < self.merge_threshold {
                merge(&mut self.table, &mut self.arena, left_id, leaf_id);
                self.check_invariants_if_debug();
                return true;
            }
        }
        if let Some(right_id) = self.arena.get(leaf_id).right {
            if size + self.arena.get(right_id).size() < self.merge_threshold {
                merge(&mut self.table, &mut self.arena, leaf_id, right_id);
            }
        }
        self.check_invariants_if_debug();
        true
    }

    /// Iterate entries in `[start_key, end_key)` (or `(start_key,
    /// end_key]` if `end_exclusive` is false) in ascending key order,
    /// stopping early if `f` returns `false`.
    pub fn scan<F>(&mut self, start_key: Option<&[u8]>, end_key: Option<&[u8]>, end_exclusive: bool, mut f: F)
    where
        F: FnMut(&Entry<V>) -> bool,
    {
        let mut leaf_id = match start_key {
            Some(k) => locate_leaf(&self.table, &self.arena, k),
            None => locate_leaf(&self.table, &self.arena, &[SMALLEST_TOKEN]),
        };
        let mut first = true;

        loop {
            let mut leaf = self.arena.get_mut(leaf_id);
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
    pub fn scan_with_count(&mut self, start_key: &[u8], count: usize) -> Vec<(Vec<u8>, V)>
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
}

/// Find the leaf that owns (or would own) `key` (§4.4 `locate_leaf`).
/// Shared between the unsynchronized core and the concurrent wrapper.
pub(crate) fn locate_leaf<V>(table: &MetaTrieHashTable, arena: &Arena<V>, key: &[u8]) -> LeafId {
    let (prefix_len, meta) = table.longest_prefix_match(key);

    match meta {
        NodeMeta::Leaf(id) => *id,
        NodeMeta::Internal { bitmap, leftmost, rightmost } => {
            if prefix_len == key.len() {
                let leftmost_leaf = arena.get(*leftmost);
                if compare_anchor_keys(key, &leftmost_leaf.anchor_key) == Ordering::Less {
                    leftmost_leaf.left.expect("leftmost has a left sibling when key precedes its anchor")
                } else {
                    *leftmost
                }
            } else {
                let missing = key[prefix_len];
                let sibling = match bitmap.find_one_sibling(missing) {
                    Some(b) => b,
                    None => {
                        let err = WormholeError::MissingSibling { prefix: key[..prefix_len].to_vec(), missing };
                        tracing::error!(error = %err, "meta trie invariant violation");
                        panic!("{err}");
                    }
                };
                let mut child_prefix = key[..prefix_len].to_vec();
                child_prefix.push(sibling);
                let child = table.get(&child_prefix).expect("child entry exists for sibling byte");

                match child {
                    NodeMeta::Leaf(lf) => {
                        if missing < sibling {
                            arena.get(*lf).left.expect("leaf has a left sibling")
                        } else {
                            *lf
                        }
                    }
                    NodeMeta::Internal { leftmost: ci_leftmost, rightmost: ci_rightmost, .. } => {
                        if missing < sibling {
                            arena.get(*ci_leftmost).left.expect("internal child has a left sibling")
                        } else {
                            *ci_rightmost
                        }
                    }
                }
            }
        }
    }
}

/// Choose where to split `leaf_id` and what anchor the new right
/// sibling gets (§4.4 `find_split_point`).
pub(crate) fn find_split_point<V>(table: &MetaTrieHashTable, arena: &Arena<V>, leaf_id: LeafId) -> WormholeResult<(usize, Vec<u8>)> {
    let leaf = arena.get(leaf_id);
    let size = leaf.size();

    for i in (size / 2).max(1)..size {
        let k1 = leaf.sorted_key(i - 1);
        let k2 = leaf.sorted_key(i);
        let lcp = longest_common_prefix(k1, k2);
        let mut candidate = k2[..lcp].to_vec();
        candidate.push(k2[lcp]);

        if candidate.as_slice() <= k1 {
            continue;
        }

        match table.get(&candidate) {
            None => return Ok((i, candidate)),
            Some(NodeMeta::Internal { .. }) => {
                let mut alt = candidate.clone();
                alt.push(SMALLEST_TOKEN);
                if table.get(&alt).is_none() {
                    // Open Question (a): accept the SMALLEST_TOKEN-extended
                    // anchor when only the Internal occupies `candidate`.
                    return Ok((i, alt));
                }
            }
            Some(NodeMeta::Leaf(_)) => {
                // candidate collides with an unrelated leaf's exact
                // anchor; inserting our new leaf there would violate
                // I4, so this split position is unusable.
            }
        }
    }

    Err(WormholeError::SplitImpossible { anchor: leaf.anchor_key.clone() })
}

/// Split `leaf_id`, returning the id of the newly created right
/// sibling. Shared between the unsynchronized core and the concurrent
/// wrapper's write path.
pub(crate) fn split<V>(table: &mut MetaTrieHashTable, arena: &mut Arena<V>, leaf_id: LeafId) -> WormholeResult<LeafId> {
    arena.get_mut(leaf_id).inc_sort();
    let (split_at, new_anchor) = find_split_point(table, arena, leaf_id)?;

    let new_leaf = arena.get_mut(leaf_id).split_to_new_leaf(new_anchor.clone(), split_at, leaf_id);
    let new_id = arena.insert(new_leaf);

    let old_right = arena.get(leaf_id).right;
    arena.get_mut(leaf_id).right = Some(new_id);
    if let Some(old_right_id) = old_right {
        arena.get_mut(old_right_id).left = Some(new_id);
    }

    let new_left = arena.get(new_id).left;
    let new_right = arena.get(new_id).right;
    table.handle_split(new_anchor, new_id, new_left, new_right, arena);

    tracing::debug!(leaf_id, new_id, "leaf split");
    Ok(new_id)
}

/// Absorb `victim` into `left`, updating sibling links and the meta
/// trie (§4.4 `merge`).
pub(crate) fn merge<V>(table: &mut MetaTrieHashTable, arena: &mut Arena<V>, left_id: LeafId, victim_id: LeafId) {
    let victim = arena.remove(victim_id);
    let victim_anchor = victim.anchor_key.clone();
    let (victim_left, victim_right) = (victim.left, victim.right);

    arena.get_mut(left_id).merge_from(victim);
    arena.get_mut(left_id).right = victim_right;
    if let Some(right_id) = victim_right {
        arena.get_mut(right_id).left = Some(left_id);
    }

    table.handle_merge(&victim_anchor, victim_id, victim_left, victim_right);
    tracing::debug!(left_id, victim_id, "leaf merge");
}

/// Debug-mode structural validator (§8 P6-P9). Returns the first
/// violation found, if any. Shared so the concurrent wrapper can run
/// the same check under its own read locks.
pub(crate) fn validate_invariants<V>(table: &MetaTrieHashTable, arena: &Arena<V>, leaf_size: usize) -> WormholeResult<()> {
    table.validate(arena.len())?;

    for (id, leaf) in arena.iter() {
        if leaf.size() > leaf_size {
            return Err(WormholeError::InvariantViolation {
                detail: format!("leaf {} exceeds leaf_size: {} > {}", id, leaf.size(), leaf_size),
            });
        }
        for entry in leaf.entries() {
            if !anchor_leq_key(&leaf.anchor_key, &entry.key) {
                return Err(WormholeError::InvariantViolation {
                    detail: format!("leaf {} entry {:?} precedes its own anchor {:?}", id, entry.key, leaf.anchor_key),
                });
            }
            if let Some(right_id) = leaf.right {
                let right_anchor = arena.get(right_id).anchor_key.clone();
                if !key_lt_anchor(&entry.key, &right_anchor) {
                    return Err(WormholeError::InvariantViolation {
                        detail: format!("leaf {} entry {:?} not less than right anchor {:?}", id, entry.key, right_anchor),
                    });
                }
            }
        }
        if let Some(right_id) = leaf.right {
            if arena.get(right_id).left != Some(id) {
                return Err(WormholeError::InvariantViolation {
                    detail: format!("leaf {} <-> {} sibling pointers inconsistent (I7/I9)", id, right_id),
                });
            }
        }
    }
    Ok(())
}
