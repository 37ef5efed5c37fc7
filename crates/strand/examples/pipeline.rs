//! Example: running each primitive once on a small workload
//!
//! `RUST_LOG=strand=debug cargo run --example pipeline`

use strand::runtime::{RuntimeConfig, ThreadPool};
use strand::{Fixpoint, ParallelLoop, ParallelSorter, PrefixScan, Wavefront, race_each};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env();
    let pool = ThreadPool::with_config(&config)?;
    println!("Strand v{} on {} workers", strand::VERSION, config.workers);

    let engine = ParallelLoop::with_config(&config);
    let samples: Vec<f64> = (0..10_000).map(|i| (i as f64 * 0.37).sin()).collect();
    let squares = engine.map(&samples, |x| x * x)?;
    let positives = engine.filter_ordered(&samples, |x| *x > 0.0)?;
    let energy = engine.reduce(&squares, 0.0, |a, b| a + b)?;
    println!("{} positive samples, energy {:.3}", positives.len(), energy);

    let mut running = squares.clone();
    PrefixScan::with_config(&config).scan(&mut running, |a, b| a + b)?;
    println!("cumulative energy at end: {:.3}", running.last().copied().unwrap_or(0.0));

    // Longest-common-subsequence table filled along anti-diagonals
    let (a, b) = (b"parallel-primitives".to_vec(), b"primal-parallels".to_vec());
    let table = std::sync::Arc::new(std::sync::Mutex::new(vec![vec![0u32; b.len() + 1]; a.len() + 1]));
    let t = std::sync::Arc::clone(&table);
    Wavefront::new(pool.executor_ref()).run_cells(a.len(), b.len(), move |i, j| {
        let mut table = strand::runtime::lock(&t);
        table[i + 1][j + 1] = if a[i] == b[j] {
            table[i][j] + 1
        } else {
            table[i][j + 1].max(table[i + 1][j])
        };
        Ok(())
    })?;
    let lcs = strand::runtime::lock(&table).last().and_then(|row| row.last().copied()).unwrap_or(0);
    println!("LCS length: {}", lcs);

    let first_root = race_each(&pool, [2.0f64, 3.0, 5.0], |n, _| Ok(n.sqrt())).wait()?;
    println!("first square root to finish: {:.4}", first_root);

    let report = Fixpoint::new(pool.executor_ref()).drain([27u64], |n, emit| {
        if n != 1 {
            emit.emit(if n % 2 == 0 { n / 2 } else { 3 * n + 1 });
        }
        Ok(())
    })?;
    println!("Collatz(27) reaches 1 after {} steps", report.rounds - 1);

    let mut keys: Vec<u64> = (0..50_000u64).map(|i| i.wrapping_mul(2_654_435_761) % 100_003).collect();
    ParallelSorter::with_config(&config).sort(&mut keys)?;
    println!("sorted {} keys, min {:?}, max {:?}", keys.len(), keys.first(), keys.last());

    Ok(())
}
