//! An in-memory ordered key-value index combining a hash-indexed meta
//! trie with a doubly-linked chain of sorted leaf nodes, giving O(log L)
//! point lookups (L = leaf size) independent of the total key count and
//! O(log K) meta-trie navigation (K = number of leaves).
//!
//! The core ([`Wormhole`]) is single-threaded; [`ConcurrentWormhole`]
//! wraps it for shared access. [`facade`] offers typed fronts for the
//! key encodings in [`key`].

pub mod concurrent;
pub mod error;
pub mod facade;
pub mod key;
pub mod leaf;
pub mod meta;
pub mod wormhole;

pub use concurrent::ConcurrentWormhole;
pub use error::{WormholeError, WormholeResult};
pub use facade::{WormholeForIntKey, WormholeForLongKey, WormholeForStringKey};
pub use key::{IntCodec, KeyCodec, LongCodec, StringCodec};
pub use wormhole::{Wormhole, WormholeConfig};
