//! rankmesh - SPMD message passing between ranks of one computation.
//!
//! A *rank* is one participant in a single-program-multiple-data run,
//! addressed by a 0-based id. Ranks share nothing; they communicate only
//! through the [`Communicator`] operations, and every collective
//! operation must be entered by all ranks in lockstep.
//!
//! ```text
//!     rank 0 ──────┐            ┌────── rank 2
//!        │    ┌────┼────────────┼───┐      │
//!        └────┤  one FIFO channel   ├──────┘
//!             │  per ordered pair   │
//!        ┌────┤  + shared barrier   ├──────┐
//!        │    └────┼────────────┼───┘      │
//!     rank 1 ──────┘            └────── rank 3
//! ```
//!
//! Two implementations are provided:
//! - [`MeshComm`]: P ranks on threads of one process, built by
//!   [`create_mesh`]. Channels are unbounded, so sends never block and
//!   delivery per source is FIFO.
//! - [`SelfComm`]: the degenerate single-rank communicator.
//!
//! Payloads must implement [`Serial`]: fixed-layout, trivially-copyable
//! data that can cross the rank boundary as raw bytes.

pub mod local;
pub mod mesh;
pub mod serial;

pub use local::SelfComm;
pub use mesh::{create_mesh, MeshComm};
pub use serial::Serial;

/// Error raised by communicator operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommError {
    /// The peer's endpoint has been dropped.
    Disconnected {
        /// Rank of the unreachable peer.
        peer: usize,
    },
    /// Rank id outside `0..size`.
    InvalidPeer {
        /// The offending rank id.
        peer: usize,
        /// Number of ranks in the mesh.
        size: usize,
    },
    /// A counted exchange was driven with inconsistent element counts.
    CountMismatch {
        /// Elements the call promised.
        expected: usize,
        /// Elements actually supplied or received.
        got: usize,
    },
}

impl std::fmt::Display for CommError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommError::Disconnected { peer } => write!(f, "rank {} has disconnected", peer),
            CommError::InvalidPeer { peer, size } => {
                write!(f, "rank {} outside mesh of {} ranks", peer, size)
            }
            CommError::CountMismatch { expected, got } => {
                write!(f, "count mismatch: expected {} elements, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for CommError {}

/// Result type for communicator operations.
pub type Result<T> = std::result::Result<T, CommError>;

/// Message-passing capabilities one rank holds toward its peers.
///
/// All ranks of a mesh must drive collective calls (`alltoallv`,
/// `alltoall`, `allgather`, `barrier`, `any`) in the same order; a rank
/// that skips one leaves its peers blocked.
pub trait Communicator {
    /// This rank's 0-based id.
    fn rank(&self) -> usize;

    /// Number of ranks participating.
    fn size(&self) -> usize;

    /// Send `data` to rank `to`. Does not block.
    fn send<T: Serial>(&self, to: usize, data: &[T]) -> Result<()>;

    /// Receive the next message from rank `from`, blocking until it
    /// arrives. Messages from one source arrive in the order sent.
    fn recv<T: Serial>(&self, from: usize) -> Result<Vec<T>>;

    /// Send `data` to `to` and receive the pending message from `from`.
    fn sendrecv<T: Serial>(&self, to: usize, data: &[T], from: usize) -> Result<Vec<T>> {
        self.send(to, data)?;
        self.recv(from)
    }

    /// Variable-count all-to-all: `counts[d]` elements of `data` go to
    /// rank `d`, in rank order. Returns the arrivals concatenated in
    /// source-rank order together with each source's share.
    fn alltoallv<T: Serial>(&self, data: &[T], counts: &[usize]) -> Result<(Vec<T>, Vec<usize>)>;

    /// Fixed all-to-all: exactly one element per destination rank.
    fn alltoall<T: Serial>(&self, data: &[T]) -> Result<Vec<T>>;

    /// Gather one element from every rank, in rank order.
    fn allgather<T: Serial>(&self, value: T) -> Result<Vec<T>>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self);

    /// Collective boolean OR: true iff `local` is true on any rank.
    fn any(&self, local: bool) -> Result<bool> {
        Ok(self.allgather(local as u8)?.iter().any(|&b| b != 0))
    }
}
