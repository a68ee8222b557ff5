//! Key-to-rank routing.
//!
//! Keys are normalized by a caller-supplied [`KeyTransform`], hashed
//! with a fixed-seed hasher, and the *high* bits of the hash pick the
//! owning rank. Selecting a prefix keeps the routing decision
//! independent of whatever low-bit scheme the local container uses for
//! its own buckets, and carries more precision than the bare
//! ceil(log2 P) bits a plain modulo would use.

use std::hash::{BuildHasher, Hash};

use ahash::RandomState;

/// Key normalization applied on entry to every operation.
///
/// Transform-equal keys collapse to one canonical key: they route to
/// the same rank and occupy the same slot in that rank's shard.
pub trait KeyTransform<K>: Clone {
    fn apply(&self, key: K) -> K;
}

/// The identity transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<K> KeyTransform<K> for Identity {
    #[inline]
    fn apply(&self, key: K) -> K {
        key
    }
}

// Fixed seeds: every rank must compute identical routes.
const SEED_A: u64 = 0x9e37_79b9_7f4a_7c15;
const SEED_B: u64 = 0x6a09_e667_f3bc_c909;
const SEED_C: u64 = 0xbb67_ae85_84ca_a73b;
const SEED_D: u64 = 0x3c6e_f372_fe94_f82b;

/// Extra hash bits beyond ceil(log2 P) fed into the modulo.
const PREFIX_SLACK_BITS: u32 = 16;

/// Maps a canonical key to its owning rank.
///
/// The mapping is pure and stable for the lifetime of a map; there is
/// no resharding.
#[derive(Clone)]
pub struct KeyToRank {
    state: RandomState,
    shift: u32,
    ranks: usize,
}

impl KeyToRank {
    pub fn new(ranks: usize) -> Self {
        assert!(ranks > 0, "rank count must be positive");
        let need = usize::BITS - (ranks - 1).leading_zeros();
        let bits = (need + PREFIX_SLACK_BITS).min(64);
        Self {
            state: RandomState::with_seeds(SEED_A, SEED_B, SEED_C, SEED_D),
            shift: 64 - bits,
            ranks,
        }
    }

    /// Number of ranks keys are spread over.
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    /// Owning rank of `key`.
    #[inline]
    pub fn rank_of<K: Hash>(&self, key: &K) -> usize {
        let h = self.state.hash_one(key);
        ((h >> self.shift) % self.ranks as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_stable() {
        let route = KeyToRank::new(7);
        for key in 0u64..100 {
            assert_eq!(route.rank_of(&key), route.rank_of(&key));
        }
    }

    #[test]
    fn identical_seeds_give_identical_routes() {
        let a = KeyToRank::new(5);
        let b = KeyToRank::new(5);
        for key in 0u64..1000 {
            assert_eq!(a.rank_of(&key), b.rank_of(&key));
        }
    }

    #[test]
    fn single_rank_maps_everything_to_zero() {
        let route = KeyToRank::new(1);
        for key in 0u64..100 {
            assert_eq!(route.rank_of(&key), 0);
        }
    }

    #[test]
    fn sequential_keys_spread_across_ranks() {
        let route = KeyToRank::new(4);
        let mut counts = [0u32; 4];
        for key in 0u64..1000 {
            counts[route.rank_of(&key)] += 1;
        }
        for count in counts {
            assert!(count > 100, "poor distribution: {:?}", counts);
        }
    }
}
