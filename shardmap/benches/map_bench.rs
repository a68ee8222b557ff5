//! Single-rank comparison of the four find protocols.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rankmesh::SelfComm;
use shardmap::{Append, ShardMap};

const PAIRS: usize = 100_000;
const UNIVERSE: u64 = 10_000;
const QUERIES: usize = 4_096;

fn build_map() -> ShardMap<u64, u64, Append, SelfComm> {
    let mut rng = StdRng::seed_from_u64(7);
    let pairs: Vec<(u64, u64)> = (0..PAIRS)
        .map(|_| (rng.gen_range(0..UNIVERSE), rng.gen()))
        .collect();
    let mut map = ShardMap::new(SelfComm::new(), Append);
    map.insert(pairs, false).unwrap();
    map
}

fn query_keys() -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(11);
    (0..QUERIES).map(|_| rng.gen_range(0..UNIVERSE)).collect()
}

fn bench_find(c: &mut Criterion) {
    let map = build_map();
    let keys = query_keys();

    let mut group = c.benchmark_group("find");
    group.bench_function("collective", |b| {
        b.iter(|| {
            let mut k = keys.clone();
            black_box(map.find_collective(&mut k, false).unwrap())
        })
    });
    group.bench_function("counted", |b| {
        b.iter(|| {
            let mut k = keys.clone();
            black_box(map.find_counted(&mut k, false).unwrap())
        })
    });
    group.bench_function("estimating", |b| {
        b.iter(|| {
            let mut k = keys.clone();
            black_box(map.find_estimating(&mut k, false).unwrap())
        })
    });
    group.bench_function("streaming", |b| {
        b.iter(|| {
            let mut k = keys.clone();
            black_box(map.find_streaming(&mut k, false).unwrap())
        })
    });
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(13);
    let pairs: Vec<(u64, u64)> = (0..PAIRS)
        .map(|_| (rng.gen_range(0..UNIVERSE), rng.gen()))
        .collect();
    c.bench_function("insert/append", |b| {
        b.iter(|| {
            let mut map = ShardMap::new(SelfComm::new(), Append);
            map.insert(black_box(pairs.clone()), false).unwrap();
            black_box(map.local_size())
        })
    });
}

criterion_group!(benches, bench_find, bench_insert);
criterion_main!(benches);
