//! Fatal error taxonomy for invariant violations and pathological splits.
//!
//! `get`/`delete` on an absent key and `put` on an existing key are not
//! errors — they are encoded directly in the return type (`Option<V>`,
//! `bool`). Everything in this module is the "should never happen in
//! practice" class: a caller is expected to treat these as programmer
//! errors, not as recoverable conditions.

use thiserror::Error;

/// Fatal failures raised by the index's internal consistency checks.
#[derive(Error, Debug)]
pub enum WormholeError {
    /// `find_split_point` exhausted every candidate split position.
    ///
    /// Only reachable if every key in a leaf shares a common prefix so
    /// long that no anchor shorter than the key itself can separate them
    /// under invariant I4.
    #[error("no valid split point found in leaf anchored at {anchor:?}")]
    SplitImpossible {
        /// Anchor key of the leaf that could not be split.
        anchor: Vec<u8>,
    },

    /// `find_one_sibling` found no bit set while descending an internal
    /// node's bitmap. Indicates the meta trie's I6 invariant has been
    /// violated.
    #[error("no sibling bit set for byte {missing:#04x} under prefix {prefix:?}")]
    MissingSibling {
        /// The internal node's anchor prefix.
        prefix: Vec<u8>,
        /// The byte that had no sibling bit.
        missing: u8,
    },

    /// `validate_invariants` (debug mode) found a structural defect.
    #[error("invariant violation: {detail}")]
    InvariantViolation {
        /// Diagnostic describing the offending structure.
        detail: String,
    },
}

/// Result alias for fallible internal operations.
pub type WormholeResult<T> = Result<T, WormholeError>;
