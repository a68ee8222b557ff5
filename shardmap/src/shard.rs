//! Per-rank local storage: one shard of the distributed map.
//!
//! Values are grouped by canonical key. Group order follows insertion
//! order within a key, and erase preserves the relative order of
//! surviving values. The total pair count is maintained incrementally
//! so `len` is O(1).

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

use crate::merge::MergePolicy;

/// One rank's slice of the key space.
pub struct Shard<K, V> {
    groups: HashMap<K, Vec<V>, RandomState>,
    pairs: usize,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    pub fn new() -> Self {
        Self {
            groups: HashMap::with_hasher(RandomState::new()),
            pairs: 0,
        }
    }

    /// Total stored pairs.
    pub fn len(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    /// Number of distinct keys.
    pub fn unique_keys(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.pairs = 0;
    }
}

impl<K: Hash + Eq + Copy, V: Copy> Shard<K, V> {
    /// All values stored under `key`.
    pub fn equal_range(&self, key: &K) -> &[V] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Insert through `policy`, which reconciles the incoming value
    /// with the key's existing group. Returns the growth in stored
    /// pairs (0 when the value merged into an existing one).
    pub fn insert_merged<M: MergePolicy<V>>(&mut self, key: K, value: V, policy: &M) -> usize {
        let group = self.groups.entry(key).or_default();
        let before = group.len();
        policy.merge(group, value);
        let grown = group.len() - before;
        self.pairs += grown;
        grown
    }

    /// Remove every value under `key`. Returns the number removed.
    pub fn erase_key(&mut self, key: &K) -> usize {
        match self.groups.remove(key) {
            Some(group) => {
                self.pairs -= group.len();
                group.len()
            }
            None => 0,
        }
    }

    /// Remove the values under `key` selected by `erase`, keeping
    /// survivor order. An emptied group releases its key.
    pub fn erase_key_where(&mut self, key: &K, erase: impl Fn(&V) -> bool) -> usize {
        let Some(group) = self.groups.get_mut(key) else {
            return 0;
        };
        let before = group.len();
        group.retain(|v| !erase(v));
        let removed = before - group.len();
        if group.is_empty() {
            self.groups.remove(key);
        }
        self.pairs -= removed;
        removed
    }

    /// Drop every key whose group is smaller than `min`. Returns the
    /// number of pairs removed.
    pub fn retain_frequent(&mut self, min: usize) -> usize {
        let mut removed = 0;
        self.groups.retain(|_, group| {
            if group.len() < min {
                removed += group.len();
                false
            } else {
                true
            }
        });
        self.pairs -= removed;
        removed
    }

    /// Distinct keys, in container order.
    pub fn keys(&self) -> Vec<K> {
        self.groups.keys().copied().collect()
    }

    /// Every stored pair, grouped by key.
    pub fn to_pairs(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.pairs);
        for (key, group) in &self.groups {
            out.extend(group.iter().map(|v| (*key, *v)));
        }
        out
    }

    /// Iterate stored pairs, grouped by key.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.groups
            .iter()
            .flat_map(|(key, group)| group.iter().map(move |v| (key, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{Append, Replace};

    #[test]
    fn append_groups_values() {
        let mut shard = Shard::new();
        assert_eq!(shard.insert_merged(1u32, 10u64, &Append), 1);
        assert_eq!(shard.insert_merged(1, 11, &Append), 1);
        assert_eq!(shard.insert_merged(2, 20, &Append), 1);
        assert_eq!(shard.len(), 3);
        assert_eq!(shard.unique_keys(), 2);
        assert_eq!(shard.equal_range(&1), &[10, 11]);
    }

    #[test]
    fn replace_bounds_groups_to_one() {
        let mut shard = Shard::new();
        assert_eq!(shard.insert_merged(1u32, 10u64, &Replace), 1);
        assert_eq!(shard.insert_merged(1, 11, &Replace), 0);
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.equal_range(&1), &[11]);
    }

    #[test]
    fn erase_key_removes_the_whole_group() {
        let mut shard = Shard::new();
        shard.insert_merged(5u32, 1u64, &Append);
        shard.insert_merged(5, 2, &Append);
        assert_eq!(shard.erase_key(&5), 2);
        assert_eq!(shard.erase_key(&5), 0);
        assert!(shard.is_empty());
    }

    #[test]
    fn filtered_erase_keeps_survivor_order() {
        let mut shard = Shard::new();
        for v in [1u64, 2, 3, 4, 5] {
            shard.insert_merged(9u32, v, &Append);
        }
        let removed = shard.erase_key_where(&9, |v| v % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(shard.equal_range(&9), &[1, 3, 5]);
        assert_eq!(shard.len(), 3);
    }

    #[test]
    fn retain_frequent_drops_rare_keys() {
        let mut shard = Shard::new();
        for v in 0u64..3 {
            shard.insert_merged(1u32, v, &Append);
        }
        shard.insert_merged(2, 0, &Append);
        assert_eq!(shard.retain_frequent(2), 1);
        assert_eq!(shard.unique_keys(), 1);
        assert_eq!(shard.len(), 3);
    }
}
