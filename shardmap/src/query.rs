//! Local query execution: walk query keys against a shard.

use std::hash::Hash;

use crate::shard::Shard;

/// Caller-supplied filter applied during local query execution.
///
/// `group` can reject a key's whole matching range before any element
/// is examined; `element` then restricts individual matches within an
/// accepted range.
pub trait Predicate<K, V> {
    /// False when the predicate is statically known to accept
    /// everything, letting all filtering code compile away.
    const FILTERS: bool = true;

    /// Range-level check over a key's whole value group.
    fn group(&self, key: &K, values: &[V]) -> bool;

    /// Element-level check for one stored pair.
    fn element(&self, key: &K, value: &V) -> bool;
}

/// The always-true predicate, recognized at compile time.
#[derive(Clone, Copy, Debug, Default)]
pub struct All;

impl<K, V> Predicate<K, V> for All {
    const FILTERS: bool = false;

    #[inline]
    fn group(&self, _: &K, _: &[V]) -> bool {
        true
    }

    #[inline]
    fn element(&self, _: &K, _: &V) -> bool {
        true
    }
}

/// Walks a sequence of query keys against a shard with a per-key
/// operation, appending to an output sink.
///
/// Query keys are expected to be unique; callers deduplicate batches
/// before handing them over. A panicking predicate propagates to the
/// caller on the rank that raised it.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Emit every stored pair matching a query key. Returns the number
    /// of pairs appended to `out`.
    pub fn find<K, V, P>(shard: &Shard<K, V>, keys: &[K], out: &mut Vec<(K, V)>, pred: &P) -> usize
    where
        K: Hash + Eq + Copy,
        V: Copy,
        P: Predicate<K, V>,
    {
        let before = out.len();
        for key in keys {
            let group = shard.equal_range(key);
            if group.is_empty() {
                continue;
            }
            if !P::FILTERS {
                out.extend(group.iter().map(|v| (*key, *v)));
            } else if pred.group(key, group) {
                for v in group {
                    if pred.element(key, v) {
                        out.push((*key, *v));
                    }
                }
            }
        }
        out.len() - before
    }

    /// Emit `(key, match_count)` for every query key, zero included.
    /// Returns the number of entries appended.
    pub fn count<K, V, P>(
        shard: &Shard<K, V>,
        keys: &[K],
        out: &mut Vec<(K, u64)>,
        pred: &P,
    ) -> usize
    where
        K: Hash + Eq + Copy,
        V: Copy,
        P: Predicate<K, V>,
    {
        for key in keys {
            let group = shard.equal_range(key);
            let matched = if !P::FILTERS {
                group.len() as u64
            } else if pred.group(key, group) {
                let mut n = 0;
                for v in group {
                    if pred.element(key, v) {
                        n += 1;
                    }
                }
                n
            } else {
                0
            };
            out.push((*key, matched));
        }
        keys.len()
    }

    /// Remove matches for every query key. Only erased values are
    /// disturbed; survivors keep their relative order. Returns the
    /// number of pairs removed.
    pub fn erase<K, V, P>(shard: &mut Shard<K, V>, keys: &[K], pred: &P) -> usize
    where
        K: Hash + Eq + Copy,
        V: Copy,
        P: Predicate<K, V>,
    {
        let mut removed = 0;
        for key in keys {
            if !P::FILTERS {
                removed += shard.erase_key(key);
            } else {
                let group = shard.equal_range(key);
                if group.is_empty() || !pred.group(key, group) {
                    continue;
                }
                removed += shard.erase_key_where(key, |v| pred.element(key, v));
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Append;

    /// Accepts values above a threshold; rejects groups larger than 8.
    struct Above(u64);

    impl Predicate<u32, u64> for Above {
        fn group(&self, _: &u32, values: &[u64]) -> bool {
            values.len() <= 8
        }

        fn element(&self, _: &u32, value: &u64) -> bool {
            *value > self.0
        }
    }

    fn shard_with(pairs: &[(u32, u64)]) -> Shard<u32, u64> {
        let mut shard = Shard::new();
        for &(k, v) in pairs {
            shard.insert_merged(k, v, &Append);
        }
        shard
    }

    #[test]
    fn find_emits_all_matches() {
        let shard = shard_with(&[(1, 10), (1, 11), (2, 20)]);
        let mut out = Vec::new();
        let n = QueryExecutor::find(&shard, &[1, 3], &mut out, &All);
        assert_eq!(n, 2);
        assert_eq!(out, vec![(1, 10), (1, 11)]);
    }

    #[test]
    fn filtered_find_restricts_elements() {
        let shard = shard_with(&[(1, 10), (1, 11), (2, 20)]);
        let mut out = Vec::new();
        QueryExecutor::find(&shard, &[1, 2], &mut out, &Above(10));
        assert_eq!(out, vec![(1, 11), (2, 20)]);
    }

    #[test]
    fn group_rejection_skips_element_checks() {
        let mut shard = Shard::new();
        for v in 0u64..20 {
            shard.insert_merged(1u32, v + 100, &Append);
        }
        let mut out = Vec::new();
        QueryExecutor::find(&shard, &[1], &mut out, &Above(0));
        assert!(out.is_empty());
    }

    #[test]
    fn count_includes_missing_keys() {
        let shard = shard_with(&[(1, 10), (1, 11)]);
        let mut out = Vec::new();
        QueryExecutor::count(&shard, &[1, 9], &mut out, &All);
        assert_eq!(out, vec![(1, 2), (9, 0)]);
    }

    #[test]
    fn erase_unfiltered_removes_groups() {
        let mut shard = shard_with(&[(1, 10), (1, 11), (2, 20)]);
        let removed = QueryExecutor::erase(&mut shard, &[1], &All);
        assert_eq!(removed, 2);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn erase_filtered_removes_individually() {
        let mut shard = shard_with(&[(1, 10), (1, 11), (1, 12)]);
        let removed = QueryExecutor::erase(&mut shard, &[1], &Above(10));
        assert_eq!(removed, 2);
        assert_eq!(shard.equal_range(&1), &[10]);
    }
}
