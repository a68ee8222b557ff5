//! The single-rank communicator.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::serial::{from_bytes, to_bytes, Serial};
use crate::{CommError, Communicator, Result};

/// A communicator for a mesh of one: every peer is the rank itself and
/// every collective is a local copy. Point-to-point sends queue on a
/// loopback buffer so the send/recv pairing still holds.
#[derive(Default)]
pub struct SelfComm {
    loopback: RefCell<VecDeque<Vec<u8>>>,
}

impl SelfComm {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer != 0 {
            return Err(CommError::InvalidPeer { peer, size: 1 });
        }
        Ok(())
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send<T: Serial>(&self, to: usize, data: &[T]) -> Result<()> {
        self.check_peer(to)?;
        self.loopback.borrow_mut().push_back(to_bytes(data));
        Ok(())
    }

    fn recv<T: Serial>(&self, from: usize) -> Result<Vec<T>> {
        self.check_peer(from)?;
        match self.loopback.borrow_mut().pop_front() {
            Some(bytes) => Ok(from_bytes(&bytes)),
            None => Err(CommError::Disconnected { peer: 0 }),
        }
    }

    fn alltoallv<T: Serial>(&self, data: &[T], counts: &[usize]) -> Result<(Vec<T>, Vec<usize>)> {
        if counts.len() != 1 {
            return Err(CommError::CountMismatch { expected: 1, got: counts.len() });
        }
        if counts[0] != data.len() {
            return Err(CommError::CountMismatch { expected: counts[0], got: data.len() });
        }
        Ok((data.to_vec(), vec![data.len()]))
    }

    fn alltoall<T: Serial>(&self, data: &[T]) -> Result<Vec<T>> {
        if data.len() != 1 {
            return Err(CommError::CountMismatch { expected: 1, got: data.len() });
        }
        Ok(data.to_vec())
    }

    fn allgather<T: Serial>(&self, value: T) -> Result<Vec<T>> {
        Ok(vec![value])
    }

    fn barrier(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectives_loop_back() {
        let comm = SelfComm::new();
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.allgather(41u8).unwrap(), vec![41]);
        assert!(comm.any(true).unwrap());
        assert!(!comm.any(false).unwrap());

        let (data, counts) = comm.alltoallv(&[1u16, 2, 3], &[3]).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(counts, vec![3]);
    }

    #[test]
    fn sendrecv_pairs_with_self() {
        let comm = SelfComm::new();
        let got: Vec<u64> = comm.sendrecv(0, &[9, 9, 9], 0).unwrap();
        assert_eq!(got, vec![9, 9, 9]);
    }
}
