// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{cmp::Ordering, fmt, hash::Hash};

use ahash::HashMap;

/// Orders two `(key, value)` pairs.
pub type Comparator<K, V> = fn((&K, &V), (&K, &V)) -> Ordering;

/// A hash map that keeps its keys sorted by a comparator over `(key, value)`
/// pairs.
///
/// Since the order may depend on the value, values are never handed out
/// mutably without re-sorting. Mutate through [`SortedMap::modify`], or
/// record [`SortedMap::index_of`] before the mutation and pass it to
/// [`SortedMap::update`] afterwards.
///
/// Positions are found with a binary search over the sorted key sequence.
/// When several entries compare equal, the exact key is located by scanning
/// outwards from the position the search landed on.
#[derive(Clone)]
pub struct SortedMap<K, V> {
    entries: HashMap<K, V>,
    keys: Vec<K>,
    cmp: Comparator<K, V>,
}

impl<K, V> SortedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(cmp: Comparator<K, V>) -> Self {
        Self {
            entries: HashMap::default(),
            keys: Vec::new(),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Inserts or replaces the value at `key`, returning the replaced value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(i) = self.index_of(&key) {
            self.keys.remove(i);
        }
        let previous = self.entries.insert(key.clone(), value);
        let i = self.find(&key);
        self.keys.insert(i, key);
        previous
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let i = self.index_of(key)?;
        self.keys.remove(i);
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Current sort position of `key`.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        if !self.entries.contains_key(key) {
            return None;
        }
        let i = self.find(key);
        if self.keys.get(i) == Some(key) {
            return Some(i);
        }
        // Neighbours may share the sort position
        for j in 1..self.keys.len() {
            if self.keys.get(i + j) == Some(key) {
                return Some(i + j);
            }
            if j <= i && self.keys[i - j] == *key {
                return Some(i - j);
            }
        }
        None
    }

    /// Moves the key that was at `index` before its value was mutated to
    /// its new sort position.
    pub fn update(&mut self, index: usize) {
        if index >= self.keys.len() {
            return;
        }
        let key = self.keys.remove(index);
        let i = self.find(&key);
        self.keys.insert(i, key);
    }

    /// Mutates the value at `key` in place and re-sorts it.
    pub fn modify<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let index = self.index_of(key)?;
        let result = f(self.entries.get_mut(key)?);
        self.update(index);
        Some(result)
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        let key = self.keys.first()?;
        self.entries.get(key).map(|value| (key, value))
    }

    pub fn pop_first(&mut self) -> Option<(K, V)> {
        if self.keys.is_empty() {
            return None;
        }
        let key = self.keys.remove(0);
        let value = self.entries.remove(&key)?;
        Some((key, value))
    }

    /// Iterates in sort order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.keys
            .iter()
            .filter_map(|key| self.entries.get(key).map(|value| (key, value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Binary search for the position of a key that is present in `entries`
    /// but not necessarily in `keys`.
    fn find(&self, key: &K) -> usize {
        let Some(value) = self.entries.get(key) else {
            return self.keys.len();
        };
        let (mut lower, mut upper) = (0, self.keys.len());
        while lower < upper {
            let pivot = (lower + upper) / 2;
            let pivot_key = &self.keys[pivot];
            let Some(pivot_value) = self.entries.get(pivot_key) else {
                return pivot;
            };
            match (self.cmp)((pivot_key, pivot_value), (key, value)) {
                Ordering::Less => lower = pivot + 1,
                Ordering::Greater => upper = pivot,
                Ordering::Equal => return pivot,
            }
        }
        lower
    }
}

impl<K, V> fmt::Debug for SortedMap<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn by_value_desc((ka, a): (&u8, &i32), (kb, b): (&u8, &i32)) -> Ordering {
        b.cmp(a).then_with(|| ka.cmp(kb))
    }

    // Only compares values, so distinct keys can share a sort position
    fn by_value_only((_, a): (&u8, &i32), (_, b): (&u8, &i32)) -> Ordering {
        a.cmp(b)
    }

    fn is_sorted(map: &SortedMap<u8, i32>) -> bool {
        let pairs: Vec<_> = map.iter().collect();
        pairs
            .windows(2)
            .all(|w| (map.cmp)(w[0], w[1]) != Ordering::Greater)
    }

    #[quickcheck]
    fn iteration_follows_comparator(pairs: Vec<(u8, i32)>) -> bool {
        let mut map = SortedMap::new(by_value_desc);
        for (k, v) in &pairs {
            map.insert(*k, *v);
        }
        let unique: ahash::HashSet<_> = pairs.iter().map(|(k, _)| *k).collect();
        map.len() == unique.len() && is_sorted(&map)
    }

    #[quickcheck]
    fn update_restores_order(pairs: Vec<(u8, i32)>, bumps: Vec<(u8, i32)>) -> bool {
        let mut map = SortedMap::new(by_value_desc);
        for (k, v) in pairs {
            map.insert(k, v);
        }
        for (k, v) in bumps {
            map.modify(&k, |value| *value = v);
            if !is_sorted(&map) {
                return false;
            }
        }
        true
    }

    #[quickcheck]
    fn index_of_finds_every_key_with_duplicate_positions(pairs: Vec<(u8, i8)>) -> bool {
        let mut map = SortedMap::new(by_value_only);
        for (k, v) in pairs {
            map.insert(k, i32::from(v % 3));
        }
        let keys: Vec<u8> = map.keys().copied().collect();
        keys.iter()
            .enumerate()
            .all(|(i, k)| map.index_of(k) == Some(i))
    }

    #[test]
    fn manual_update_with_previous_index() {
        let mut map = SortedMap::new(by_value_desc);
        map.insert(1, 10);
        map.insert(2, 20);
        map.insert(3, 30);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![3, 2, 1]);

        let previous = map.index_of(&1).unwrap();
        assert_eq!(previous, 2);
        map.entries.insert(1, 40);
        map.update(previous);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 3, 2]);
        assert_eq!(map.first(), Some((&1, &40)));
    }

    #[test]
    fn insert_replaces_and_resorts() {
        let mut map = SortedMap::new(by_value_desc);
        assert_eq!(map.insert(7, 1), None);
        assert_eq!(map.insert(8, 2), None);
        assert_eq!(map.insert(7, 3), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.pop_first(), Some((7, 3)));
        assert_eq!(map.pop_first(), Some((8, 2)));
        assert_eq!(map.pop_first(), None);
        assert!(map.is_empty());
    }

    #[test]
    fn remove_and_out_of_range_update() {
        let mut map = SortedMap::new(by_value_desc);
        map.insert(1, 1);
        map.insert(2, 2);
        assert_eq!(map.remove(&1), Some(1));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.index_of(&1), None);
        map.update(42);
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![2]);
    }
}
