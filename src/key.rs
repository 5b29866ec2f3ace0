//! Key encoding and the anchor-key comparison rule.
//!
//! All downstream code operates on raw byte slices; `KeyCodec` only
//! governs how a typed key (signed/unsigned integer, UTF-8 string) is
//! turned into the canonical byte sequence the tree actually stores and
//! compares.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// The reserved byte used to disambiguate anchor collisions (I4) and to
/// mark the leftmost leaf's anchor.
pub const SMALLEST_TOKEN: u8 = 0x00;

/// Converts a typed key into the canonical byte sequence used by the
/// index, and back.
pub trait KeyCodec {
    /// The typed key this codec encodes.
    type Key;

    /// Encode a key to its canonical byte representation.
    fn encode(key: &Self::Key) -> Vec<u8>;

    /// Decode a canonical byte representation back to the typed key.
    fn decode(bytes: &[u8]) -> Self::Key;
}

/// Pass-through codec for UTF-8 strings: lexicographic byte order is the
/// natural string order.
pub struct StringCodec;

impl KeyCodec for StringCodec {
    type Key = String;

    fn encode(key: &String) -> Vec<u8> {
        key.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Big-endian, sign-bit-flipped codec for `i32` keys: numeric order
/// matches lexicographic byte order.
pub struct IntCodec;

impl KeyCodec for IntCodec {
    type Key = i32;

    fn encode(key: &i32) -> Vec<u8> {
        let biased = (*key as u32) ^ 0x8000_0000;
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<BigEndian>(biased).expect("writing to a Vec never fails");
        buf
    }

    fn decode(bytes: &[u8]) -> i32 {
        let mut reader = &bytes[..4];
        let biased = reader.read_u32::<BigEndian>().expect("4-byte slice");
        (biased ^ 0x8000_0000) as i32
    }
}

/// Big-endian, sign-bit-flipped codec for `i64` keys.
pub struct LongCodec;

impl KeyCodec for LongCodec {
    type Key = i64;

    fn encode(key: &i64) -> Vec<u8> {
        let biased = (*key as u64) ^ 0x8000_0000_0000_0000;
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<BigEndian>(biased).expect("writing to a Vec never fails");
        buf
    }

    fn decode(bytes: &[u8]) -> i64 {
        let mut reader = &bytes[..8];
        let biased = reader.read_u64::<BigEndian>().expect("8-byte slice");
        (biased ^ 0x8000_0000_0000_0000) as i64
    }
}

/// Strips a single trailing `SMALLEST_TOKEN`, returning the length to
/// compare over.
fn truncated_len(anchor: &[u8]) -> usize {
    match anchor.last() {
        Some(&SMALLEST_TOKEN) => anchor.len() - 1,
        _ => anchor.len(),
    }
}

/// Compares two anchor keys under I5: a trailing `SMALLEST_TOKEN` is
/// ignored for ordering purposes, so `"X"` and `"X\0"` compare equal as
/// anchors while remaining distinct hash-table keys.
pub fn compare_anchor_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let la = truncated_len(a);
    let lb = truncated_len(b);
    a[..la].cmp(&b[..lb]).then(la.cmp(&lb))
}

/// Longest common prefix length of two byte slices.
pub fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// `anchor ≤ k`, treating a trailing `SMALLEST_TOKEN` on `anchor` as
/// absent (I1's left bound; `k` is compared raw, per I5).
pub fn anchor_leq_key(anchor: &[u8], k: &[u8]) -> bool {
    &anchor[..truncated_len(anchor)] <= k
}

/// `k < anchor`, treating a trailing `SMALLEST_TOKEN` on `anchor` as
/// absent (I1's right bound).
pub fn key_lt_anchor(k: &[u8], anchor: &[u8]) -> bool {
    k < &anchor[..truncated_len(anchor)]
}
