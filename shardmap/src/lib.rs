//! shardmap - hash-sharded distributed key-value maps.
//!
//! A map's pairs are spread over the P ranks of a communicator; each
//! rank owns the shard its keys hash to, and batched operations route
//! queries to owners, execute locally, and gather results back to the
//! issuing rank.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ rank r                                                        │
//! │  batch ─► transform ─► dedup/prefold ─► bucket by KeyToRank   │
//! │                                            │ alltoallv /      │
//! │                                            ▼ ring sendrecv    │
//! │  Shard (key → value group) ◄── QueryExecutor ◄── arrivals     │
//! │       │                                                       │
//! │       └── results ──► return exchange ──► issuing rank        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One generic container, [`ShardMap`], covers the four variants via a
//! merge policy value:
//! - [`Map`] replaces (one value per key),
//! - [`Multimap`] appends,
//! - [`ReductionMap`] folds duplicates through a binary operator,
//! - [`CountingMap`] counts bare-key occurrences by addition.
//!
//! Four alternative query protocols trade memory against latency; see
//! the method docs on [`ShardMap`]. All batched operations are
//! collective: every rank calls together, empty batch or not.

pub mod dedup;
pub mod error;
pub mod exchange;
pub mod map;
pub mod merge;
pub mod query;
pub mod routing;
pub mod shard;

pub use error::{Error, Result};
pub use map::{CountAdd, CountingMap, Map, Multimap, ReductionMap, ShardMap};
pub use merge::{Append, Fold, MergePolicy, Replace};
pub use query::{All, Predicate, QueryExecutor};
pub use routing::{Identity, KeyToRank, KeyTransform};
pub use shard::Shard;
