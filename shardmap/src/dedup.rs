//! Batch deduplication and pre-insertion reduction.
//!
//! Query batches are deduplicated before distribution: duplicate
//! queries cost bandwidth and return duplicate answers for nothing.
//! Insert batches of the folding variants are condensed to one entry
//! per key for the same reason. Append-style inserts are never
//! deduplicated, because duplicates are meaningful entries there.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use ahash::RandomState;

/// Reduce `keys` to one representative per distinct key, in place.
///
/// With `sorted`, equal keys are assumed adjacent and a linear run
/// dedup is used; otherwise a hash set tracks seen keys. The first
/// occurrence survives and the relative order of survivors is kept.
pub fn unique_keys<K: Hash + Eq + Copy>(keys: &mut Vec<K>, sorted: bool) {
    if sorted {
        keys.dedup();
    } else {
        let mut seen: HashSet<K, RandomState> =
            HashSet::with_capacity_and_hasher(keys.len(), RandomState::new());
        keys.retain(|k| seen.insert(*k));
    }
}

/// Fold duplicate keys of a pair batch through `op`, in place and in
/// arrival order: the accumulated value is always the left operand.
/// Each key keeps its first position; survivor order is preserved.
pub fn fold_pairs_by_key<K, V, F>(pairs: &mut Vec<(K, V)>, op: F)
where
    K: Hash + Eq + Copy,
    V: Copy,
    F: Fn(V, V) -> V,
{
    if pairs.len() < 2 {
        return;
    }
    let mut slot: HashMap<K, usize, RandomState> =
        HashMap::with_capacity_and_hasher(pairs.len(), RandomState::new());
    let mut write = 0;
    for read in 0..pairs.len() {
        let (key, value) = pairs[read];
        match slot.entry(key) {
            Entry::Occupied(e) => {
                let i = *e.get();
                pairs[i].1 = op(pairs[i].1, value);
            }
            Entry::Vacant(e) => {
                e.insert(write);
                pairs[write] = (key, value);
                write += 1;
            }
        }
    }
    pairs.truncate(write);
}
