//! Distribution of batches to their owning ranks.
//!
//! A batch leaves the issuing rank laid out by destination; after the
//! exchange it holds the rank's arrivals grouped by source. All
//! functions here are collective: every rank must call with the same
//! shape of operation, even when its local batch is empty.

use rankmesh::{Communicator, Serial};
use tracing::trace;

use crate::error::Result;

/// Collective check that every rank's batch is empty.
///
/// Always a reduction over all ranks, never a local test: ranks must
/// not diverge in control flow over their private batch sizes.
pub fn batch_all_empty<T, C: Communicator>(batch: &[T], comm: &C) -> Result<bool> {
    Ok(!comm.any(!batch.is_empty())?)
}

/// Exclusive prefix sums of `counts`.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut sum = 0;
    for &c in counts {
        displs.push(sum);
        sum += c;
    }
    displs
}

/// Reorder `items` into destination-rank layout, stable within each
/// destination, and return per-destination counts.
pub fn bucket_by_rank<T, F>(items: &mut Vec<T>, ranks: usize, rank_of: F) -> Vec<usize>
where
    F: Fn(&T) -> usize,
{
    let mut buckets: Vec<Vec<T>> = (0..ranks).map(|_| Vec::new()).collect();
    for item in items.drain(..) {
        buckets[rank_of(&item)].push(item);
    }
    let mut counts = Vec::with_capacity(ranks);
    for mut bucket in buckets {
        counts.push(bucket.len());
        items.append(&mut bucket);
    }
    counts
}

/// Route `items` to their owning ranks. On return `items` holds this
/// rank's arrivals grouped by source rank; the returned counts give
/// each source's share. Input order does not survive.
pub fn distribute<T, C, F>(items: &mut Vec<T>, rank_of: F, comm: &C) -> Result<Vec<usize>>
where
    T: Serial,
    C: Communicator,
    F: Fn(&T) -> usize,
{
    let send_counts = bucket_by_rank(items, comm.size(), rank_of);
    let (arrived, recv_counts) = comm.alltoallv(items, &send_counts)?;
    trace!(
        rank = comm.rank(),
        sent = send_counts.iter().sum::<usize>(),
        arrived = arrived.len(),
        "distributed batch"
    );
    *items = arrived;
    Ok(recv_counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankmesh::SelfComm;

    #[test]
    fn bucketing_is_stable_per_destination() {
        let mut items = vec![10u32, 21, 30, 11, 20, 31];
        let counts = bucket_by_rank(&mut items, 3, |v| (*v / 10 - 1) as usize);
        assert_eq!(counts, vec![2, 2, 2]);
        assert_eq!(items, vec![10, 11, 20, 21, 30, 31]);
    }

    #[test]
    fn displacements_are_exclusive_prefix_sums() {
        assert_eq!(displacements(&[2, 0, 3]), vec![0, 2, 2]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn single_rank_distribute_is_identity_up_to_order() {
        let comm = SelfComm::new();
        let mut items = vec![5u64, 1, 9];
        let counts = distribute(&mut items, |_| 0, &comm).unwrap();
        assert_eq!(counts, vec![3]);
        assert_eq!(items, vec![5, 1, 9]);
    }

    #[test]
    fn empty_batch_is_globally_empty_on_one_rank() {
        let comm = SelfComm::new();
        assert!(batch_all_empty::<u8, _>(&[], &comm).unwrap());
        assert!(!batch_all_empty(&[1u8], &comm).unwrap());
    }
}
