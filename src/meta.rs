//! Flat hash map from anchor prefix to node metadata, with
//! longest-prefix-match via binary search over prefix length (§4.3).
//!
//! `NodeMeta` only ever stores [`LeafId`]s, never leaf data — the arena
//! in [`crate::wormhole::Wormhole`] is the sole owner of `LeafNode`
//! contents, so this module has no value-type parameter.

use std::collections::HashMap;

use crate::error::{WormholeError, WormholeResult};
use crate::key::SMALLEST_TOKEN;
use crate::leaf::{Arena, LeafId};

/// A 256-bit set of "live child head byte" flags for an internal node.
#[derive(Debug, Clone, Default)]
pub struct Bitmap256 {
    words: [u64; 4],
}

impl Bitmap256 {
    pub fn new() -> Self {
        Bitmap256::default()
    }

    pub fn with_bit(byte: u8) -> Self {
        let mut b = Bitmap256::new();
        b.set(byte);
        b
    }

    pub fn set(&mut self, byte: u8) {
        let (word, bit) = (byte as usize / 64, byte as usize % 64);
        self.words[word] |= 1 << bit;
    }

    pub fn clear(&mut self, byte: u8) {
        let (word, bit) = (byte as usize / 64, byte as usize % 64);
        self.words[word] &= !(1 << bit);
    }

    pub fn get(&self, byte: u8) -> bool {
        let (word, bit) = (byte as usize / 64, byte as usize % 64);
        self.words[word] & (1 << bit) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Closest set bit to `missing` (which is itself never set — see
    /// `find_one_sibling`'s doc), preferring left siblings over right
    /// (Open Question (b), preserved from the source).
    pub fn find_one_sibling(&self, missing: u8) -> Option<u8> {
        let mut b = missing;
        while b > 0 {
            b -= 1;
            if self.get(b) {
                return Some(b);
            }
        }
        let mut b = missing;
        while b < 255 {
            b += 1;
            if self.get(b) {
                return Some(b);
            }
        }
        None
    }
}

/// Tagged node descriptor: either a leaf or an internal branching point.
#[derive(Debug, Clone)]
pub enum NodeMeta {
    Leaf(LeafId),
    Internal {
        bitmap: Bitmap256,
        leftmost: LeafId,
        rightmost: LeafId,
    },
}

/// Flat `anchor_prefix -> NodeMeta` map with cached longest-prefix
/// length, so `longest_prefix_match` can binary-search instead of
/// probing every length from 0.
#[derive(Debug, Default)]
pub struct MetaTrieHashTable {
    table: HashMap<Vec<u8>, NodeMeta>,
    max_prefix_len: usize,
}

impl MetaTrieHashTable {
    pub fn new() -> Self {
        MetaTrieHashTable { table: HashMap::new(), max_prefix_len: 0 }
    }

    pub fn get(&self, prefix: &[u8]) -> Option<&NodeMeta> {
        self.table.get(prefix)
    }

    /// Insert `node_meta` under `prefix`. The hash-table key IS the
    /// anchor prefix, which makes I4 ("NodeMeta.anchor_prefix == p")
    /// hold by construction rather than by a redundant stored field.
    pub fn put(&mut self, prefix: Vec<u8>, node_meta: NodeMeta) {
        self.bump_max_prefix_len(prefix.len());
        self.table.insert(prefix, node_meta);
    }

    fn bump_max_prefix_len(&mut self, len: usize) {
        if len > self.max_prefix_len {
            self.max_prefix_len = len;
        }
    }

    /// Binary search over prefix length in `[0, min(|key|, max_prefix_len)]`
    /// for the longest `m` with `key[0..m] ∈ table`. Relies on presence
    /// being monotonic in prefix length: `handle_split` always inserts
    /// every strict prefix of a new anchor, so if some length is present
    /// every shorter length is too.
    pub fn longest_prefix_match<'a>(&'a self, key: &[u8]) -> (usize, &'a NodeMeta) {
        let upper = key.len().min(self.max_prefix_len);
        debug_assert!(self.table.contains_key(&[][..]), "root entry must always be present");

        let (mut lo, mut hi) = (0usize, upper + 1);
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.table.contains_key(&key[..mid]) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (lo, self.table.get(&key[..lo]).expect("lo is known present"))
    }

    /// Record a leaf split: insert the new leaf, then walk every strict
    /// prefix of `new_anchor` in increasing length, creating or updating
    /// Internal ancestors per §4.3.
    pub fn handle_split<V>(
        &mut self,
        new_anchor: Vec<u8>,
        new_leaf_id: LeafId,
        new_leaf_left: Option<LeafId>,
        new_leaf_right: Option<LeafId>,
        arena: &Arena<V>,
    ) {
        assert!(!self.table.contains_key(&new_anchor), "anchor collision: caller must choose a collision-free anchor");
        self.put(new_anchor.clone(), NodeMeta::Leaf(new_leaf_id));

        for ell in 0..new_anchor.len() {
            let p = new_anchor[..ell].to_vec();
            let byte = new_anchor[ell];

            match self.table.get(&p) {
                None => {
                    self.put(p, NodeMeta::Internal {
                        bitmap: Bitmap256::with_bit(byte),
                        leftmost: new_leaf_id,
                        rightmost: new_leaf_id,
                    });
                }
                Some(NodeMeta::Leaf(existing_id)) => {
                    let existing_id = *existing_id;
                    let mut rewritten_anchor = p.clone();
                    rewritten_anchor.push(SMALLEST_TOKEN);
                    arena.get_mut(existing_id).anchor_key = rewritten_anchor.clone();

                    self.table.remove(&p);
                    self.put(rewritten_anchor, NodeMeta::Leaf(existing_id));

                    // SMALLEST_TOKEN always sorts first, so the rewritten
                    // existing leaf is unconditionally the left child and
                    // new_leaf (reachable via `byte`) the right child of
                    // this freshly created branch.
                    let mut bitmap = Bitmap256::with_bit(byte);
                    bitmap.set(SMALLEST_TOKEN);
                    self.put(p, NodeMeta::Internal { bitmap, leftmost: existing_id, rightmost: new_leaf_id });
                }
                Some(NodeMeta::Internal { .. }) => {
                    let Some(NodeMeta::Internal { bitmap, leftmost, rightmost }) = self.table.get_mut(&p) else {
                        unreachable!()
                    };
                    bitmap.set(byte);
                    if Some(*leftmost) == new_leaf_right {
                        *leftmost = new_leaf_id;
                    }
                    if Some(*rightmost) == new_leaf_left {
                        *rightmost = new_leaf_id;
                    }
                }
            }
        }
    }

    /// Record a leaf merge: remove the victim's Leaf entry, then walk
    /// strict prefixes from deepest to shallowest clearing bitmap bits
    /// and collapsing empty Internal nodes, per §4.3. `victim_left`/
    /// `victim_right` are the victim's sibling links *before* it was
    /// unlinked (Open Question (c): bitmap clearing always uses the
    /// victim's own anchor byte, never the absorbing left sibling's).
    pub fn handle_merge(
        &mut self,
        victim_anchor: &[u8],
        victim_id: LeafId,
        victim_left: Option<LeafId>,
        victim_right: Option<LeafId>,
    ) {
        self.table.remove(victim_anchor);

        let mut child_removed = true;
        let mut ell = victim_anchor.len();
        while ell > 0 {
            ell -= 1;
            let p = &victim_anchor[..ell];
            let b = victim_anchor[ell];

            match self.table.get_mut(p) {
                Some(NodeMeta::Internal { bitmap, leftmost, rightmost }) => {
                    if child_removed {
                        bitmap.clear(b);
                    }
                    if bitmap.is_empty() {
                        self.table.remove(p);
                        child_removed = true;
                    } else {
                        child_removed = false;
                        let mut changed = false;
                        if *leftmost == victim_id {
                            *leftmost = victim_right.expect("leaf chain consistent (I7)");
                            changed = true;
                        }
                        if *rightmost == victim_id {
                            *rightmost = victim_left.expect("leaf chain consistent (I7)");
                            changed = true;
                        }
                        if !changed {
                            break;
                        }
                    }
                }
                _ => panic!("meta entry at prefix {:?} must be Internal during merge", p),
            }
        }
    }

    /// Debug-mode structural check for I4/I6/I8 (§8 P7, P8).
    pub fn validate(&self, arena_len: usize) -> WormholeResult<()> {
        for (prefix, meta) in &self.table {
            if let NodeMeta::Internal { bitmap, leftmost, rightmost } = meta {
                if bitmap.is_empty() {
                    return Err(WormholeError::InvariantViolation {
                        detail: format!("internal node at {:?} has empty bitmap", prefix),
                    });
                }
                if *leftmost >= arena_len || *rightmost >= arena_len {
                    return Err(WormholeError::InvariantViolation {
                        detail: format!("internal node at {:?} references out-of-range leaf", prefix),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafNode;

    fn fresh_arena() -> Arena<i32> {
        let mut arena = Arena::new();
        arena.insert(LeafNode::new(vec![SMALLEST_TOKEN], 8, None, None));
        arena
    }

    fn fresh_table() -> MetaTrieHashTable {
        let mut t = MetaTrieHashTable::new();
        t.put(vec![], NodeMeta::Internal { bitmap: Bitmap256::with_bit(SMALLEST_TOKEN), leftmost: 0, rightmost: 0 });
        t.put(vec![SMALLEST_TOKEN], NodeMeta::Leaf(0));
        t
    }

    #[test]
    fn bitmap_roundtrip() {
        let mut b = Bitmap256::new();
        assert!(b.is_empty());
        b.set(5);
        b.set(200);
        assert!(b.get(5));
        assert!(b.get(200));
        assert!(!b.get(6));
        b.clear(5);
        assert!(!b.get(5));
    }

    #[test]
    fn find_one_sibling_prefers_left() {
        let mut b = Bitmap256::new();
        b.set(10);
        b.set(20);
        assert_eq!(b.find_one_sibling(15), Some(10));
        b.clear(10);
        assert_eq!(b.find_one_sibling(15), Some(20));
    }

    #[test]
    fn longest_prefix_match_finds_root_on_empty_table() {
        let t = fresh_table();
        let (len, meta) = t.longest_prefix_match(b"Z");
        assert_eq!(len, 0);
        assert!(matches!(meta, NodeMeta::Internal { .. }));
    }

    #[test]
    fn handle_split_creates_internal_ancestors() {
        let mut table = fresh_table();
        let mut arena = fresh_arena();
        let new_id = arena.insert(LeafNode::new(b"M".to_vec(), 8, Some(0), None));
        table.handle_split(b"M".to_vec(), new_id, Some(0), None, &mut arena);

        let (len, meta) = table.longest_prefix_match(b"M");
        assert_eq!(len, 1);
        assert!(matches!(meta, NodeMeta::Leaf(id) if *id == new_id));
    }

    #[test]
    fn handle_split_resolves_leaf_internal_collision() {
        let mut table = MetaTrieHashTable::new();
        let mut arena: Arena<i32> = Arena::new();
        table.put(vec![], NodeMeta::Internal { bitmap: Bitmap256::with_bit(b'X'), leftmost: 0, rightmost: 0 });
        let existing = arena.insert(LeafNode::new(b"X".to_vec(), 8, None, None));
        table.put(b"X".to_vec(), NodeMeta::Leaf(existing));

        let new_id = arena.insert(LeafNode::new(b"X\x01".to_vec(), 8, Some(existing), None));
        table.handle_split(b"X".to_vec(), new_id, Some(existing), None, &mut arena);

        // existing leaf must have been rewritten under X\0
        assert_eq!(arena.get(existing).anchor_key, b"X\0".to_vec());
        assert!(matches!(table.get(b"X\0"), Some(NodeMeta::Leaf(id)) if *id == existing));
        assert!(matches!(table.get(b"X"), Some(NodeMeta::Internal { .. })));
    }

    #[test]
    fn handle_merge_collapses_empty_internal() {
        let mut table = fresh_table();
        let mut arena = fresh_arena();
        let new_id = arena.insert(LeafNode::new(b"M".to_vec(), 8, Some(0), None));
        table.handle_split(b"M".to_vec(), new_id, Some(0), None, &mut arena);

        table.handle_merge(b"M", new_id, Some(0), None);
        assert!(table.get(b"M").is_none());
        let (len, _) = table.longest_prefix_match(b"M");
        assert_eq!(len, 0);
    }
}
