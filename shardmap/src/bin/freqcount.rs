//! Distributed frequency table demo.
//!
//! Spawns one thread per rank, feeds each rank a slice of a synthetic
//! key stream, counts occurrences with a [`CountingMap`], and reports
//! the most frequent keys plus a probe lookup run through all four
//! query protocols.

use std::thread;
use std::time::Instant;

use clap::Parser;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;

use rankmesh::create_mesh;
use rankmesh::Communicator;
use shardmap::CountingMap;

#[derive(Parser, Debug)]
#[command(name = "freqcount")]
#[command(about = "Distributed key-frequency table over thread ranks")]
struct Cli {
    /// Number of ranks (threads)
    #[arg(short = 'r', long, default_value = "4")]
    ranks: usize,

    /// Keys drawn per rank
    #[arg(short = 'n', long, default_value = "100000")]
    keys_per_rank: usize,

    /// Distinct key universe
    #[arg(short = 'u', long, default_value = "1000")]
    universe: u64,

    /// Rows to print from the frequency table
    #[arg(short = 't', long, default_value = "10")]
    top: usize,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let start = Instant::now();
    let endpoints = create_mesh(cli.ranks);

    let mut tables: Vec<Vec<(u64, u64)>> = thread::scope(|s| {
        let cli = &cli;
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank() as u64;
                    let mut rng = StdRng::seed_from_u64(cli.seed ^ rank);
                    // Skewed draw so the table has clear leaders.
                    let skew = rand::distributions::WeightedIndex::new(
                        (0..cli.universe).map(|k| 1.0 / (k + 1) as f64),
                    )
                    .expect("weights are positive");
                    let keys: Vec<u64> = (0..cli.keys_per_rank)
                        .map(|_| skew.sample(&mut rng) as u64)
                        .collect();

                    let mut map = CountingMap::counting(comm);
                    map.insert_keys(keys, false).expect("insert failed");

                    // Probe every rank's view of the same keys through
                    // each protocol; they must agree.
                    let probe: Vec<u64> = (0..cli.universe.min(64)).collect();
                    let a = map.find_collective(&mut probe.clone(), true).unwrap().len();
                    let b = map.find_counted(&mut probe.clone(), true).unwrap().len();
                    let c = map.find_estimating(&mut probe.clone(), true).unwrap().len();
                    let d = map.find_streaming(&mut probe.clone(), true).unwrap().len();
                    assert!(a == b && b == c && c == d, "protocols disagree");

                    map.to_pairs()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut table: Vec<(u64, u64)> = tables.drain(..).flatten().collect();
    table.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let total: u64 = table.iter().map(|&(_, n)| n).sum();
    println!(
        "{} ranks, {} draws, {} distinct keys, {:.2?}",
        cli.ranks,
        total,
        table.len(),
        start.elapsed()
    );
    for (key, count) in table.iter().take(cli.top) {
        println!("{:>12}  {:>10}", key, count);
    }
}
