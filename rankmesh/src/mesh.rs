//! Thread-backed rank mesh.
//!
//! [`create_mesh`] builds P endpoints meant to be moved onto P threads,
//! one per rank. Every ordered rank pair gets its own unbounded FIFO
//! channel (including a rank's loopback to itself), so point-to-point
//! sends never block and per-source ordering is guaranteed. Collectives
//! are assembled from the channel matrix plus one shared barrier.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use crate::serial::{from_bytes, to_bytes, Serial};
use crate::{CommError, Communicator, Result};

/// One rank's endpoint in a thread mesh.
///
/// Not `Sync`: an endpoint belongs to exactly one controlling thread.
pub struct MeshComm {
    rank: usize,
    size: usize,
    /// `senders[d]` feeds the channel (self → d).
    senders: Vec<Sender<Vec<u8>>>,
    /// `receivers[s]` drains the channel (s → self).
    receivers: Vec<Receiver<Vec<u8>>>,
    barrier: Arc<Barrier>,
}

/// Create the endpoints of a `size`-rank mesh, in rank order.
pub fn create_mesh(size: usize) -> Vec<MeshComm> {
    assert!(size > 0, "a mesh needs at least one rank");

    // tx[s][d] / rx[s][d]: the channel from rank s to rank d.
    let mut tx: Vec<Vec<Option<Sender<Vec<u8>>>>> = (0..size)
        .map(|_| (0..size).map(|_| None).collect())
        .collect();
    let mut rx: Vec<Vec<Option<Receiver<Vec<u8>>>>> = (0..size)
        .map(|_| (0..size).map(|_| None).collect())
        .collect();
    for (s, row) in tx.iter_mut().enumerate() {
        for (d, slot) in row.iter_mut().enumerate() {
            let (t, r) = channel();
            *slot = Some(t);
            rx[s][d] = Some(r);
        }
    }

    // Row r of tx holds r's outgoing channels; column r of rx holds
    // r's incoming channels.
    let barrier = Arc::new(Barrier::new(size));
    let mut endpoints = Vec::with_capacity(size);
    for r in 0..size {
        let senders = tx[r].iter_mut().map(|s| s.take().unwrap()).collect();
        let receivers = rx.iter_mut().map(|row| row[r].take().unwrap()).collect();
        endpoints.push(MeshComm {
            rank: r,
            size,
            senders,
            receivers,
            barrier: Arc::clone(&barrier),
        });
    }
    endpoints
}

impl MeshComm {
    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.size {
            return Err(CommError::InvalidPeer { peer, size: self.size });
        }
        Ok(())
    }
}

impl Communicator for MeshComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send<T: Serial>(&self, to: usize, data: &[T]) -> Result<()> {
        self.check_peer(to)?;
        self.senders[to]
            .send(to_bytes(data))
            .map_err(|_| CommError::Disconnected { peer: to })
    }

    fn recv<T: Serial>(&self, from: usize) -> Result<Vec<T>> {
        self.check_peer(from)?;
        let bytes = self.receivers[from]
            .recv()
            .map_err(|_| CommError::Disconnected { peer: from })?;
        Ok(from_bytes(&bytes))
    }

    fn alltoallv<T: Serial>(&self, data: &[T], counts: &[usize]) -> Result<(Vec<T>, Vec<usize>)> {
        if counts.len() != self.size {
            return Err(CommError::CountMismatch { expected: self.size, got: counts.len() });
        }
        let total: usize = counts.iter().sum();
        if total != data.len() {
            return Err(CommError::CountMismatch { expected: total, got: data.len() });
        }

        let mut offset = 0;
        for (d, &n) in counts.iter().enumerate() {
            self.send(d, &data[offset..offset + n])?;
            offset += n;
        }

        let mut recv_counts = vec![0usize; self.size];
        let mut out = Vec::new();
        for (s, slot) in recv_counts.iter_mut().enumerate() {
            let part: Vec<T> = self.recv(s)?;
            *slot = part.len();
            out.extend_from_slice(&part);
        }
        Ok((out, recv_counts))
    }

    fn alltoall<T: Serial>(&self, data: &[T]) -> Result<Vec<T>> {
        if data.len() != self.size {
            return Err(CommError::CountMismatch { expected: self.size, got: data.len() });
        }
        for (d, item) in data.iter().enumerate() {
            self.send(d, std::slice::from_ref(item))?;
        }
        let mut out = Vec::with_capacity(self.size);
        for s in 0..self.size {
            let part: Vec<T> = self.recv(s)?;
            if part.len() != 1 {
                return Err(CommError::CountMismatch { expected: 1, got: part.len() });
            }
            out.push(part[0]);
        }
        Ok(out)
    }

    fn allgather<T: Serial>(&self, value: T) -> Result<Vec<T>> {
        for d in 0..self.size {
            self.send(d, std::slice::from_ref(&value))?;
        }
        let mut out = Vec::with_capacity(self.size);
        for s in 0..self.size {
            let part: Vec<T> = self.recv(s)?;
            if part.len() != 1 {
                return Err(CommError::CountMismatch { expected: 1, got: part.len() });
            }
            out.push(part[0]);
        }
        Ok(out)
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}
