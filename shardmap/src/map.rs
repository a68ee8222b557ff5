//! The distributed map: sharded storage plus collective operations.
//!
//! One generic container covers all four variants; the merge policy
//! value picks the insert semantics (see [`crate::merge`]). Every
//! mutating or querying batch operation is collective: all ranks must
//! call together, in the same order, even with an empty local batch.
//! The empty-batch short-circuit itself is a collective reduction, so
//! control flow never diverges across ranks.
//!
//! Four query-execution protocols are offered, trading memory
//! footprint against latency and synchronization:
//! - [`ShardMap::find_collective`]: two all-to-all exchanges, full
//!   in-memory materialization, fewest synchronization points.
//! - [`ShardMap::find_counted`]: exact-size counting pre-pass, then a
//!   ring of paired send/receive steps; peak memory bounded to one
//!   round's data at the cost of a second local pass.
//! - [`ShardMap::find_estimating`]: single local pass with online
//!   capacity estimation from the match density seen so far.
//! - [`ShardMap::find_streaming`]: ring exchange with per-step paired
//!   size messages and one incrementally grown result buffer, for
//!   results too large to materialize before a return exchange.

use std::cell::Cell;
use std::hash::Hash;

use rankmesh::{Communicator, Serial};
use tracing::debug;

use crate::dedup::{fold_pairs_by_key, unique_keys};
use crate::error::Result;
use crate::exchange::{batch_all_empty, displacements, distribute};
use crate::merge::{Fold, MergePolicy};
use crate::query::{All, Predicate, QueryExecutor};
use crate::routing::{Identity, KeyToRank, KeyTransform};
use crate::shard::Shard;

/// Fraction of a single-rank query batch processed to calibrate the
/// result-capacity estimate.
const ESTIMATE_SAMPLE: f64 = 0.05;
/// Headroom multiplier applied when re-estimating result capacity.
const ESTIMATE_SLACK: f64 = 1.1;

/// Lazily cached count of distinct local keys, invalidated whenever
/// the local size changes.
struct UniqueCount {
    cached: Cell<usize>,
    dirty: Cell<bool>,
}

impl UniqueCount {
    fn new() -> Self {
        Self {
            cached: Cell::new(0),
            dirty: Cell::new(true),
        }
    }

    fn get<K, V>(&self, shard: &Shard<K, V>) -> usize {
        if self.dirty.get() {
            self.cached.set(shard.unique_keys());
            self.dirty.set(false);
        }
        self.cached.get()
    }

    fn invalidate(&self) {
        self.dirty.set(true);
    }
}

/// A hash-sharded key-value map spread over the ranks of `comm`.
///
/// Keys and values must be [`Serial`]: fixed-size, pointer-free plain
/// data, because they cross the rank boundary as raw bytes. Every pair
/// lives on exactly one rank, fixed by the routing hash of its
/// (transformed) key for the map's lifetime.
pub struct ShardMap<K, V, M, C, T = Identity> {
    comm: C,
    route: KeyToRank,
    transform: T,
    policy: M,
    shard: Shard<K, V>,
    unique: UniqueCount,
}

/// One value per key; insert replaces (last arrival wins per rank).
pub type Map<K, V, C, T = Identity> = ShardMap<K, V, crate::merge::Replace, C, T>;

/// Unbounded values per key; insert appends.
pub type Multimap<K, V, C, T = Identity> = ShardMap<K, V, crate::merge::Append, C, T>;

/// One value per key, folded through a binary operator on insert.
pub type ReductionMap<K, V, F, C, T = Identity> = ShardMap<K, V, Fold<F>, C, T>;

/// Addition operator used by [`CountingMap`].
pub type CountAdd = fn(u64, u64) -> u64;

/// Key-occurrence counter: a reduction map over `u64` counts with
/// addition, fed by bare keys.
pub type CountingMap<K, C, T = Identity> = ShardMap<K, u64, Fold<CountAdd>, C, T>;

fn sum_counts(a: u64, b: u64) -> u64 {
    a + b
}

impl<K, V, M, C> ShardMap<K, V, M, C, Identity>
where
    K: Serial + Hash + Eq,
    V: Serial,
    M: MergePolicy<V>,
    C: Communicator,
{
    /// Create an empty map over `comm`. Collective: every rank must
    /// construct with the same policy.
    pub fn new(comm: C, policy: M) -> Self {
        Self::with_transform(comm, policy, Identity)
    }
}

impl<K, C> CountingMap<K, C>
where
    K: Serial + Hash + Eq,
    C: Communicator,
{
    /// Create an empty counting map over `comm`.
    pub fn counting(comm: C) -> Self {
        ShardMap::new(comm, Fold(sum_counts as CountAdd))
    }
}

impl<K, V, M, C, T> ShardMap<K, V, M, C, T>
where
    K: Serial + Hash + Eq,
    V: Serial,
    M: MergePolicy<V>,
    C: Communicator,
    T: KeyTransform<K>,
{
    /// Create an empty map with a key-normalization transform.
    /// Transform-equal keys share a rank and a storage slot.
    pub fn with_transform(comm: C, policy: M, transform: T) -> Self {
        let route = KeyToRank::new(comm.size());
        Self {
            comm,
            route,
            transform,
            policy,
            shard: Shard::new(),
            unique: UniqueCount::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn ranks(&self) -> usize {
        self.comm.size()
    }

    /// Pairs stored on this rank.
    pub fn local_size(&self) -> usize {
        self.shard.len()
    }

    pub fn local_empty(&self) -> bool {
        self.shard.is_empty()
    }

    /// Distinct keys stored on this rank (cached, recomputed lazily).
    pub fn local_unique_size(&self) -> usize {
        self.unique.get(&self.shard)
    }

    /// Average stored values per distinct local key. An estimate for
    /// buffer pre-sizing only, never used for correctness.
    pub fn multiplicity(&self) -> f64 {
        let unique = self.local_unique_size();
        if unique == 0 {
            1.0
        } else {
            self.shard.len() as f64 / unique as f64
        }
    }

    /// Distinct local keys.
    pub fn keys(&self) -> Vec<K> {
        self.shard.keys()
    }

    /// Every local pair.
    pub fn to_pairs(&self) -> Vec<(K, V)> {
        self.shard.to_pairs()
    }

    /// The local container. Escape hatch: reads have no remote effect.
    pub fn local_container(&self) -> &Shard<K, V> {
        &self.shard
    }

    /// Mutable escape hatch. Direct mutations stay local to this rank;
    /// the unique-key cache is invalidated up front.
    pub fn local_container_mut(&mut self) -> &mut Shard<K, V> {
        self.unique.invalidate();
        &mut self.shard
    }

    fn transform_keys(&self, keys: &mut [K]) {
        for key in keys.iter_mut() {
            *key = self.transform.apply(*key);
        }
    }

    fn map_empty_everywhere(&self) -> Result<bool> {
        Ok(!self.comm.any(!self.shard.is_empty())?)
    }

    /// Dedup a query batch and route it; returns per-source counts.
    fn distribute_query(&self, keys: &mut Vec<K>, sorted: bool) -> Result<Vec<usize>> {
        unique_keys(keys, sorted);
        distribute(keys, |k: &K| self.route.rank_of(k), &self.comm)
    }

    // ---- insert ----

    /// Insert a batch of pairs. Collective; returns the number of pairs
    /// newly stored on this rank after merging (a replaced or folded
    /// value does not count).
    pub fn insert(&mut self, input: Vec<(K, V)>, sorted_input: bool) -> Result<usize> {
        self.insert_filtered(input, sorted_input, &All)
    }

    /// Insert with an element-wise predicate applied before local
    /// insertion.
    pub fn insert_filtered<P: Predicate<K, V>>(
        &mut self,
        mut input: Vec<(K, V)>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<usize> {
        if batch_all_empty(&input, &self.comm)? {
            return Ok(0);
        }
        for pair in input.iter_mut() {
            pair.0 = self.transform.apply(pair.0);
        }

        if self.comm.size() > 1 {
            if M::PREFOLD {
                // One entry per key leaves this rank.
                fold_pairs_by_key(&mut input, |a, b| self.policy.combine(a, b));
            }
            distribute(&mut input, |p: &(K, V)| self.route.rank_of(&p.0), &self.comm)?;
        }

        let mut inserted = 0;
        if !P::FILTERS {
            for (key, value) in input {
                inserted += self.shard.insert_merged(key, value, &self.policy);
            }
        } else {
            for (key, value) in input {
                if pred.element(&key, &value) {
                    inserted += self.shard.insert_merged(key, value, &self.policy);
                }
            }
        }
        if inserted > 0 {
            self.unique.invalidate();
        }
        debug!(rank = self.comm.rank(), inserted, total = self.shard.len(), "insert done");
        Ok(inserted)
    }

    // ---- find ----

    /// Find via two all-to-all exchanges: queries scatter to owners,
    /// results gather back. All local results are materialized before
    /// the return exchange; highest peak memory, fewest
    /// synchronization points. `keys` is deduplicated and reordered in
    /// place.
    pub fn find_collective(&self, keys: &mut Vec<K>, sorted_input: bool) -> Result<Vec<(K, V)>> {
        self.find_collective_filtered(keys, sorted_input, &All)
    }

    pub fn find_collective_filtered<P: Predicate<K, V>>(
        &self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<Vec<(K, V)>> {
        let mut results = Vec::new();
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(results);
        }
        self.transform_keys(keys);

        if self.comm.size() > 1 {
            let recv_counts = self.distribute_query(keys, sorted_input)?;
            results.reserve(keys.len());
            let mut send_counts = vec![0usize; self.comm.size()];
            let mut start = 0;
            for (source, &arrived) in recv_counts.iter().enumerate() {
                let end = start + arrived;
                send_counts[source] =
                    QueryExecutor::find(&self.shard, &keys[start..end], &mut results, pred);
                start = end;
            }
            debug!(rank = self.comm.rank(), produced = results.len(), "local scan done");
            let (returned, _) = self.comm.alltoallv(&results, &send_counts)?;
            results = returned;
        } else {
            unique_keys(keys, sorted_input);
            results.reserve((keys.len() as f64 * self.multiplicity()).ceil() as usize);
            QueryExecutor::find(&self.shard, keys, &mut results, pred);
        }
        Ok(results)
    }

    /// Find with an exact-size pre-pass: per-destination result counts
    /// flow first so every buffer is sized before any result data
    /// moves, then a ring of paired send/receive steps returns the
    /// data. Peak memory is bounded to one round's results, at the
    /// cost of O(P) synchronization rounds and a second local pass.
    pub fn find_counted(&self, keys: &mut Vec<K>, sorted_input: bool) -> Result<Vec<(K, V)>> {
        self.find_counted_filtered(keys, sorted_input, &All)
    }

    pub fn find_counted_filtered<P: Predicate<K, V>>(
        &self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<Vec<(K, V)>> {
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(Vec::new());
        }
        self.transform_keys(keys);

        let ranks = self.comm.size();
        if ranks > 1 {
            let recv_counts = self.distribute_query(keys, sorted_input)?;
            let recv_displs = displacements(&recv_counts);

            // Counting pass: how many results each source will get.
            let mut send_counts = vec![0usize; ranks];
            let mut counted: Vec<(K, u64)> = Vec::new();
            for source in 0..ranks {
                counted.clear();
                let range = recv_displs[source]..recv_displs[source] + recv_counts[source];
                QueryExecutor::count(&self.shard, &keys[range], &mut counted, pred);
                send_counts[source] = counted.iter().map(|&(_, n)| n as usize).sum();
            }
            let resp_counts = self.comm.alltoall(&send_counts)?;
            let total: usize = resp_counts.iter().sum();
            debug!(rank = self.comm.rank(), total, "response sizes known");

            // Ring of paired steps, each send overlapped with its
            // matching receive; one round's data in flight at a time.
            let rank = self.comm.rank();
            let mut per_source: Vec<Vec<(K, V)>> = (0..ranks).map(|_| Vec::new()).collect();
            let mut round = Vec::new();
            for step in 0..ranks {
                let send_to = (rank + step) % ranks;
                let recv_from = (rank + ranks - step) % ranks;
                round.clear();
                let range = recv_displs[send_to]..recv_displs[send_to] + recv_counts[send_to];
                QueryExecutor::find(&self.shard, &keys[range], &mut round, pred);
                let incoming = self.comm.sendrecv(send_to, &round, recv_from)?;
                debug_assert_eq!(incoming.len(), resp_counts[recv_from]);
                per_source[recv_from] = incoming;
            }

            let mut results = Vec::with_capacity(total);
            for part in per_source {
                results.extend_from_slice(&part);
            }
            Ok(results)
        } else {
            unique_keys(keys, sorted_input);
            let mut counted: Vec<(K, u64)> = Vec::with_capacity(keys.len());
            QueryExecutor::count(&self.shard, keys, &mut counted, pred);
            let exact: usize = counted.iter().map(|&(_, n)| n as usize).sum();
            let mut results = Vec::with_capacity(exact);
            QueryExecutor::find(&self.shard, keys, &mut results, pred);
            Ok(results)
        }
    }

    /// Find with a single local pass and online capacity estimation:
    /// no counting pre-pass; the result buffer grows from the match
    /// density of the prefix processed so far, with geometric
    /// headroom. On one rank a small fixed prefix of the queries
    /// calibrates the estimate instead.
    pub fn find_estimating(&self, keys: &mut Vec<K>, sorted_input: bool) -> Result<Vec<(K, V)>> {
        self.find_estimating_filtered(keys, sorted_input, &All)
    }

    pub fn find_estimating_filtered<P: Predicate<K, V>>(
        &self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<Vec<(K, V)>> {
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(Vec::new());
        }
        self.transform_keys(keys);

        let ranks = self.comm.size();
        if ranks > 1 {
            let recv_counts = self.distribute_query(keys, sorted_input)?;
            let mut results = Vec::with_capacity(keys.len());
            let mut send_counts = vec![0usize; ranks];
            let mut processed = 0;
            for source in 0..ranks {
                let end = processed + recv_counts[source];
                send_counts[source] =
                    QueryExecutor::find(&self.shard, &keys[processed..end], &mut results, pred);
                processed = end;

                // The next source's batch is assumed similar; regrow
                // from observed density before it lands.
                if processed < keys.len() && results.len() + send_counts[source] > results.capacity()
                {
                    let density = results.len() as f64 / processed as f64;
                    let estimate =
                        (density * keys.len() as f64 * ESTIMATE_SLACK).ceil() as usize;
                    debug!(
                        rank = self.comm.rank(),
                        estimate,
                        produced = results.len(),
                        "regrowing result buffer"
                    );
                    results.reserve(estimate.saturating_sub(results.len()));
                }
            }
            let (returned, _) = self.comm.alltoallv(&results, &send_counts)?;
            Ok(returned)
        } else {
            unique_keys(keys, sorted_input);
            let sample = ((keys.len() as f64 * ESTIMATE_SAMPLE).ceil() as usize)
                .clamp(1, keys.len());
            let mut results = Vec::with_capacity(keys.len());
            QueryExecutor::find(&self.shard, &keys[..sample], &mut results, pred);
            let density = results.len() as f64 / sample as f64;
            let estimate = (density * keys.len() as f64 * ESTIMATE_SLACK).ceil() as usize;
            results.reserve(estimate.saturating_sub(results.len()));
            QueryExecutor::find(&self.shard, &keys[sample..], &mut results, pred);
            Ok(results)
        }
    }

    /// Find over a ring where each step exchanges a small paired size
    /// message with the current partner before the answer data, growing
    /// a single result buffer incrementally as sizes become known.
    /// Intended for result sets too large to materialize fully before
    /// a return exchange.
    pub fn find_streaming(&self, keys: &mut Vec<K>, sorted_input: bool) -> Result<Vec<(K, V)>> {
        self.find_streaming_filtered(keys, sorted_input, &All)
    }

    pub fn find_streaming_filtered<P: Predicate<K, V>>(
        &self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<Vec<(K, V)>> {
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(Vec::new());
        }
        self.transform_keys(keys);
        unique_keys(keys, sorted_input);
        // Queries this rank issued, before distribution rewrites `keys`.
        let issued = keys.len();

        let ranks = self.comm.size();
        if ranks > 1 {
            let recv_counts = distribute(keys, |k: &K| self.route.rank_of(k), &self.comm)?;
            let recv_displs = displacements(&recv_counts);

            let rank = self.comm.rank();
            let mut results: Vec<(K, V)> = Vec::new();
            let mut round = Vec::with_capacity(keys.len());
            let mut answered_of_mine = 0usize;
            let mut received = 0usize;
            for step in 0..ranks {
                let send_to = (rank + step) % ranks;
                let recv_from = (rank + ranks - step) % ranks;

                round.clear();
                let range = recv_displs[send_to]..recv_displs[send_to] + recv_counts[send_to];
                let found = QueryExecutor::find(&self.shard, &keys[range], &mut round, pred);

                // Paired size message: how many of the partner's
                // queries this answers, and how many pairs follow.
                let sizes = self.comm.sendrecv(
                    send_to,
                    &[(recv_counts[send_to] as u64, found as u64)],
                    recv_from,
                )?;
                let (their_queries, their_found) = (sizes[0].0 as usize, sizes[0].1 as usize);
                answered_of_mine += their_queries;

                if received + their_found > results.capacity() {
                    let density =
                        (received + their_found) as f64 / answered_of_mine.max(1) as f64;
                    let estimate = (density * issued as f64 * ESTIMATE_SLACK).ceil() as usize;
                    debug!(
                        rank,
                        step,
                        estimate,
                        received,
                        "regrowing streamed result buffer"
                    );
                    results.reserve(estimate.saturating_sub(results.len()));
                }

                let incoming = self.comm.sendrecv(send_to, &round, recv_from)?;
                debug_assert_eq!(incoming.len(), their_found);
                results.extend_from_slice(&incoming);
                received += their_found;
            }
            // The estimate may have overshot; hand back exactly what
            // arrived.
            results.truncate(received);
            Ok(results)
        } else {
            // Memory constrained: take the exact count first.
            let mut counted: Vec<(K, u64)> = Vec::with_capacity(keys.len());
            QueryExecutor::count(&self.shard, keys, &mut counted, pred);
            let exact: usize = counted.iter().map(|&(_, n)| n as usize).sum();
            let mut results = Vec::with_capacity(exact);
            QueryExecutor::find(&self.shard, keys, &mut results, pred);
            Ok(results)
        }
    }

    /// Emit every local pair matching `pred`. Non-collective scan with
    /// a closing barrier so ranks leave together.
    pub fn find_where<P: Predicate<K, V>>(&self, pred: &P) -> Result<Vec<(K, V)>> {
        let mut results = Vec::new();
        if !self.shard.is_empty() {
            let keys = self.shard.keys();
            results.reserve((keys.len() as f64 * self.multiplicity()).ceil() as usize);
            QueryExecutor::find(&self.shard, &keys, &mut results, pred);
        }
        if self.comm.size() > 1 {
            self.comm.barrier();
        }
        Ok(results)
    }

    // ---- count ----

    /// Count stored matches per query key. Collective; one entry per
    /// distinct query key, zero included. `keys` is deduplicated and
    /// reordered in place.
    pub fn count(&self, keys: &mut Vec<K>, sorted_input: bool) -> Result<Vec<(K, u64)>> {
        self.count_filtered(keys, sorted_input, &All)
    }

    pub fn count_filtered<P: Predicate<K, V>>(
        &self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<Vec<(K, u64)>> {
        let mut results = Vec::new();
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(results);
        }
        self.transform_keys(keys);

        if self.comm.size() > 1 {
            let recv_counts = self.distribute_query(keys, sorted_input)?;
            results.reserve(keys.len());
            let mut start = 0;
            for &arrived in &recv_counts {
                let end = start + arrived;
                QueryExecutor::count(&self.shard, &keys[start..end], &mut results, pred);
                start = end;
            }
            // One answer per query, so the arrival counts are the
            // return counts.
            let (returned, _) = self.comm.alltoallv(&results, &recv_counts)?;
            results = returned;
        } else {
            unique_keys(keys, sorted_input);
            results.reserve(keys.len());
            QueryExecutor::count(&self.shard, keys, &mut results, pred);
        }
        Ok(results)
    }

    /// Count matches for every local key. Non-collective scan with a
    /// closing barrier.
    pub fn count_where<P: Predicate<K, V>>(&self, pred: &P) -> Result<Vec<(K, u64)>> {
        let mut results = Vec::new();
        if !self.shard.is_empty() {
            let keys = self.shard.keys();
            results.reserve(keys.len());
            QueryExecutor::count(&self.shard, &keys, &mut results, pred);
        }
        if self.comm.size() > 1 {
            self.comm.barrier();
        }
        Ok(results)
    }

    // ---- erase ----

    /// Remove every stored pair matching the query keys. Collective;
    /// returns the number of pairs removed on this rank. `keys` is
    /// deduplicated and reordered in place.
    pub fn erase(&mut self, keys: &mut Vec<K>, sorted_input: bool) -> Result<usize> {
        self.erase_filtered(keys, sorted_input, &All)
    }

    /// Erase restricted to elements individually satisfying `pred`
    /// within each matched key.
    pub fn erase_filtered<P: Predicate<K, V>>(
        &mut self,
        keys: &mut Vec<K>,
        sorted_input: bool,
        pred: &P,
    ) -> Result<usize> {
        if batch_all_empty(keys, &self.comm)? || self.map_empty_everywhere()? {
            return Ok(0);
        }
        self.transform_keys(keys);

        let mut sorted = sorted_input;
        if self.comm.size() > 1 {
            unique_keys(keys, sorted);
            distribute(keys, |k: &K| self.route.rank_of(k), &self.comm)?;
            // Arrivals from different sources may repeat a key.
            sorted = false;
        }
        unique_keys(keys, sorted);

        let removed = QueryExecutor::erase(&mut self.shard, keys, pred);
        if removed > 0 {
            self.unique.invalidate();
        }
        debug!(rank = self.comm.rank(), removed, "erase done");
        Ok(removed)
    }

    /// Remove every local pair matching `pred`. With the always-true
    /// predicate this clears the shard outright. Non-collective apart
    /// from the closing barrier.
    pub fn erase_where<P: Predicate<K, V>>(&mut self, pred: &P) -> Result<usize> {
        let removed = if self.shard.is_empty() {
            0
        } else if !P::FILTERS {
            let all = self.shard.len();
            self.shard.clear();
            all
        } else {
            let keys = self.shard.keys();
            QueryExecutor::erase(&mut self.shard, &keys, pred)
        };
        if removed > 0 {
            self.unique.invalidate();
        }
        if self.comm.size() > 1 {
            self.comm.barrier();
        }
        Ok(removed)
    }

    /// Drop every local key stored with fewer than `min_count` values.
    /// Local-only; call with the same threshold on every rank to keep
    /// the global map meaningful.
    pub fn retain_frequent(&mut self, min_count: usize) -> usize {
        let removed = self.shard.retain_frequent(min_count);
        if removed > 0 {
            self.unique.invalidate();
        }
        removed
    }
}

impl<K, C, T> CountingMap<K, C, T>
where
    K: Serial + Hash + Eq,
    C: Communicator,
    T: KeyTransform<K>,
{
    /// Count key occurrences: each key in `input` contributes one
    /// unit, pre-folded per key before distribution. Collective.
    pub fn insert_keys(&mut self, input: Vec<K>, sorted_input: bool) -> Result<usize> {
        let pairs: Vec<(K, u64)> = input.into_iter().map(|k| (k, 1)).collect();
        self.insert(pairs, sorted_input)
    }
}
