//! Lockstep collective tests for the thread mesh.

use std::thread;

use rankmesh::{create_mesh, Communicator, MeshComm};

/// Run `f` on every rank of a fresh `size`-rank mesh and collect the
/// per-rank return values in rank order.
fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(MeshComm) -> R + Send + Sync,
{
    let endpoints = create_mesh(size);
    thread::scope(|s| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|comm| s.spawn(|| f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn ranks_are_assigned_in_order() {
    let ids = run_ranks(4, |comm| (comm.rank(), comm.size()));
    assert_eq!(ids, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
}

#[test]
fn alltoallv_routes_segments() {
    // Rank r sends the single value r*10+d to each destination d.
    let results = run_ranks(3, |comm| {
        let data: Vec<u32> = (0..3).map(|d| comm.rank() as u32 * 10 + d).collect();
        comm.alltoallv(&data, &[1, 1, 1]).unwrap()
    });
    for (r, (data, counts)) in results.into_iter().enumerate() {
        assert_eq!(counts, vec![1, 1, 1]);
        let expected: Vec<u32> = (0..3).map(|s| s * 10 + r as u32).collect();
        assert_eq!(data, expected);
    }
}

#[test]
fn alltoallv_with_uneven_counts() {
    // Rank r sends r copies of its id to rank 0 and nothing elsewhere.
    let results = run_ranks(4, |comm| {
        let r = comm.rank();
        let data: Vec<u64> = vec![r as u64; r];
        let mut counts = vec![0usize; 4];
        counts[0] = r;
        comm.alltoallv(&data, &counts).unwrap()
    });
    let (at_zero, counts_at_zero) = &results[0];
    assert_eq!(*counts_at_zero, vec![0, 1, 2, 3]);
    assert_eq!(*at_zero, vec![1, 2, 2, 3, 3, 3]);
    for (data, _) in &results[1..] {
        assert!(data.is_empty());
    }
}

#[test]
fn allgather_collects_in_rank_order() {
    let results = run_ranks(4, |comm| comm.allgather(comm.rank() as u16).unwrap());
    for gathered in results {
        assert_eq!(gathered, vec![0, 1, 2, 3]);
    }
}

#[test]
fn any_is_a_global_or() {
    let results = run_ranks(4, |comm| {
        let some = comm.any(comm.rank() == 2).unwrap();
        let none = comm.any(false).unwrap();
        (some, none)
    });
    assert!(results.iter().all(|&(some, none)| some && !none));
}

#[test]
fn sendrecv_ring_shifts_by_one() {
    let results = run_ranks(5, |comm| {
        let right = (comm.rank() + 1) % 5;
        let left = (comm.rank() + 4) % 5;
        let got: Vec<usize> = comm.sendrecv(right, &[comm.rank()], left).unwrap();
        got[0]
    });
    assert_eq!(results, vec![4, 0, 1, 2, 3]);
}

#[test]
fn per_source_ordering_is_fifo() {
    let results = run_ranks(2, |comm| {
        let peer = 1 - comm.rank();
        for i in 0..10u32 {
            comm.send(peer, &[i]).unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..10 {
            got.extend(comm.recv::<u32>(peer).unwrap());
        }
        got
    });
    for got in results {
        assert_eq!(got, (0..10).collect::<Vec<u32>>());
    }
}

#[test]
fn barrier_synchronizes_all_ranks() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let arrivals = AtomicUsize::new(0);
    run_ranks(4, |comm| {
        arrivals.fetch_add(1, Ordering::SeqCst);
        comm.barrier();
        // After the barrier every rank must have arrived.
        assert_eq!(arrivals.load(Ordering::SeqCst), 4);
    });
}
