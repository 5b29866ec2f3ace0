//! Typed front doors over the raw byte-string core, one per key type the
//! index ships a [`KeyCodec`] for.

use crate::key::{IntCodec, KeyCodec, LongCodec, StringCodec};
use crate::wormhole::Wormhole;

/// Index keyed by `i32`, encoded with [`IntCodec`].
pub struct WormholeForIntKey<V> {
    inner: Wormhole<V>,
}

impl<V> WormholeForIntKey<V> {
    pub fn new(leaf_size: usize, debug_mode: bool) -> Self {
        WormholeForIntKey { inner: Wormhole::new(leaf_size, debug_mode) }
    }

    pub fn put(&mut self, key: i32, value: V) {
        self.inner.put(IntCodec::encode(&key), value);
    }

    pub fn get(&self, key: i32) -> Option<V>
    where
        V: Clone,
    {
        self.inner.get(&IntCodec::encode(&key))
    }

    pub fn delete(&mut self, key: i32) -> bool {
        self.inner.delete(&IntCodec::encode(&key))
    }

    /// Visit entries in `[start_key, end_key)` (or `(start_key, end_key]`
    /// if `end_exclusive` is false) in ascending key order.
    pub fn scan<F>(&mut self, start_key: Option<i32>, end_key: Option<i32>, end_exclusive: bool, mut f: F)
    where
        F: FnMut(i32, &V) -> bool,
    {
        let start_bytes = start_key.map(|k| IntCodec::encode(&k));
        let end_bytes = end_key.map(|k| IntCodec::encode(&k));
        self.inner.scan(start_bytes.as_deref(), end_bytes.as_deref(), end_exclusive, |e| {
            f(IntCodec::decode(&e.key), &e.value)
        });
    }

    pub fn scan_with_count(&mut self, start_key: i32, count: usize) -> Vec<(i32, V)>
    where
        V: Clone,
    {
        self.inner
            .scan_with_count(&IntCodec::encode(&start_key), count)
            .into_iter()
            .map(|(k, v)| (IntCodec::decode(&k), v))
            .collect()
    }
}

/// Index keyed by `i64`, encoded with [`LongCodec`].
pub struct WormholeForLongKey<V> {
    inner: Wormhole<V>,
}

impl<V> WormholeForLongKey<V> {
    pub fn new(leaf_size: usize, debug_mode: bool) -> Self {
        WormholeForLongKey { inner: Wormhole::new(leaf_size, debug_mode) }
    }

    pub fn put(&mut self, key: i64, value: V) {
        self.inner.put(LongCodec::encode(&key), value);
    }

    pub fn get(&self, key: i64) -> Option<V>
    where
        V: Clone,
    {
        self.inner.get(&LongCodec::encode(&key))
    }

    pub fn delete(&mut self, key: i64) -> bool {
        self.inner.delete(&LongCodec::encode(&key))
    }

    /// Visit entries in `[start_key, end_key)` (or `(start_key, end_key]`
    /// if `end_exclusive` is false) in ascending key order.
    pub fn scan<F>(&mut self, start_key: Option<i64>, end_key: Option<i64>, end_exclusive: bool, mut f: F)
    where
        F: FnMut(i64, &V) -> bool,
    {
        let start_bytes = start_key.map(|k| LongCodec::encode(&k));
        let end_bytes = end_key.map(|k| LongCodec::encode(&k));
        self.inner.scan(start_bytes.as_deref(), end_bytes.as_deref(), end_exclusive, |e| {
            f(LongCodec::decode(&e.key), &e.value)
        });
    }

    pub fn scan_with_count(&mut self, start_key: i64, count: usize) -> Vec<(i64, V)>
    where
        V: Clone,
    {
        self.inner
            .scan_with_count(&LongCodec::encode(&start_key), count)
            .into_iter()
            .map(|(k, v)| (LongCodec::decode(&k), v))
            .collect()
    }
}

/// Index keyed by `String`, encoded with [`StringCodec`].
pub struct WormholeForStringKey<V> {
    inner: Wormhole<V>,
}

impl<V> WormholeForStringKey<V> {
    pub fn new(leaf_size: usize, debug_mode: bool) -> Self {
        WormholeForStringKey { inner: Wormhole::new(leaf_size, debug_mode) }
    }

    pub fn put(&mut self, key: String, value: V) {
        self.inner.put(StringCodec::encode(&key), value);
    }

    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.inner.get(key.as_bytes())
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.inner.delete(key.as_bytes())
    }

    /// Visit entries in `[start_key, end_key)` (or `(start_key, end_key]`
    /// if `end_exclusive` is false) in ascending key order.
    pub fn scan<F>(&mut self, start_key: Option<&str>, end_key: Option<&str>, end_exclusive: bool, mut f: F)
    where
        F: FnMut(String, &V) -> bool,
    {
        self.inner.scan(start_key.map(str::as_bytes), end_key.map(str::as_bytes), end_exclusive, |e| {
            f(StringCodec::decode(&e.key), &e.value)
        });
    }

    pub fn scan_with_count(&mut self, start_key: &str, count: usize) -> Vec<(String, V)>
    where
        V: Clone,
    {
        self.inner
            .scan_with_count(start_key.as_bytes(), count)
            .into_iter()
            .map(|(k, v)| (StringCodec::decode(&k), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_key_facade_orders_negative_before_positive() {
        let mut wh: WormholeForIntKey<&str> = WormholeForIntKey::new(8, true);
        wh.put(5, "five");
        wh.put(-5, "neg-five");
        wh.put(0, "zero");
        let scanned = wh.scan_with_count(i32::MIN, 3);
        assert_eq!(scanned, vec![(-5, "neg-five"), (0, "zero"), (5, "five")]);
    }

    #[test]
    fn int_key_facade_scan_visits_bounded_range() {
        let mut wh: WormholeForIntKey<i32> = WormholeForIntKey::new(8, true);
        for k in [-5, 0, 2, 5, 9] {
            wh.put(k, k);
        }
        let mut seen = Vec::new();
        wh.scan(Some(0), Some(9), true, |k, v| {
            seen.push((k, *v));
            true
        });
        assert_eq!(seen, vec![(0, 0), (2, 2), (5, 5)]);
    }

    #[test]
    fn string_key_facade_roundtrips() {
        let mut wh: WormholeForStringKey<i32> = WormholeForStringKey::new(8, true);
        wh.put("hello".to_string(), 1);
        assert_eq!(wh.get("hello"), Some(1));
        assert!(wh.delete("hello"));
        assert_eq!(wh.get("hello"), None);
    }

    #[test]
    fn string_key_facade_scan_visits_ascending_order() {
        let mut wh: WormholeForStringKey<i32> = WormholeForStringKey::new(4, true);
        for (k, v) in [("alpha", 1), ("beta", 2), ("gamma", 3)] {
            wh.put(k.to_string(), v);
        }
        let mut seen = Vec::new();
        wh.scan(None, None, false, |k, v| {
            seen.push((k, *v));
            true
        });
        assert_eq!(seen, vec![("alpha".to_string(), 1), ("beta".to_string(), 2), ("gamma".to_string(), 3)]);
    }

    #[test]
    fn long_key_facade_preserves_numeric_order_across_scan() {
        let mut wh: WormholeForLongKey<i32> = WormholeForLongKey::new(8, true);
        for v in [10i64, -10, 1 << 40, -(1 << 40), 0] {
            wh.put(v, v as i32);
        }
        let scanned = wh.scan_with_count(i64::MIN, 5);
        let keys: Vec<i64> = scanned.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![-(1i64 << 40), -10, 0, 10, 1 << 40]);
    }
}
