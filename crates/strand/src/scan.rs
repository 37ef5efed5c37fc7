//! Prefix Scan
//!
//! In-place inclusive and exclusive prefix scans with interchangeable
//! strategies. `combine` must be associative; it is always applied as
//! `combine(earlier, later)`, so commutativity is not required.
//!
//! # Strategies
//! - `Serial`: one strided pass on the calling thread
//! - `LoadBalanced`: pairwise up-pass, recursion over odd positions, down-pass
//! - `Barrier`: P contiguous chunks, a barrier action scans the chunk totals
//!
//! Every strategy yields the same output for any worker count.

use std::sync::Mutex;

use strand_runtime::{PhaseBarrier, RuntimeConfig, TaskResult, fork_join_with, lock};

use crate::fork_join::{ParallelLoop, split_by_partitions};
use crate::partition::partition;
use crate::root_fault;

/// Sequences at or below this many strided elements are scanned serially
const LOAD_BALANCED_CUTOFF: usize = 64;

/// How a scan is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanStrategy {
    /// Pick from the worker count
    #[default]
    Auto,
    Serial,
    LoadBalanced,
    Barrier,
}

/// Parallel prefix scan engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixScan {
    workers: usize,
    strategy: ScanStrategy,
}

impl Default for PrefixScan {
    fn default() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }
}

impl PrefixScan {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            strategy: ScanStrategy::Auto,
        }
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self::new(config.workers)
    }

    /// Builder-style strategy override
    pub fn strategy(mut self, strategy: ScanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Strategy a scan will actually use.
    ///
    /// `Auto` prefers the barrier scan above two workers, the load-balanced
    /// scan at exactly two, and the serial scan on one.
    pub fn resolved_strategy(&self) -> ScanStrategy {
        match self.strategy {
            ScanStrategy::Auto => match self.workers {
                1 => ScanStrategy::Serial,
                2 => ScanStrategy::LoadBalanced,
                _ => ScanStrategy::Barrier,
            },
            explicit => explicit,
        }
    }

    /// Inclusive scan: `data[i]` becomes the combination of `data[..=i]`
    pub fn scan<T, F>(&self, data: &mut [T], combine: F) -> TaskResult<()>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        if data.len() < 2 {
            return Ok(());
        }

        let strategy = self.resolved_strategy();
        tracing::debug!(
            "Scanning {} elements with {:?} on {} workers",
            data.len(),
            strategy,
            self.workers
        );

        match strategy {
            ScanStrategy::Serial | ScanStrategy::Auto => {
                scan_serial(data, 0, 1, &combine);
                Ok(())
            }
            ScanStrategy::LoadBalanced => {
                let engine = ParallelLoop::new(self.workers);
                scan_load_balanced(&engine, data, 0, 1, &combine)
            }
            ScanStrategy::Barrier => scan_barrier(data, self.workers, &combine),
        }
    }

    /// Exclusive scan: `data[i]` becomes `identity` combined with `data[..i]`.
    ///
    /// `identity` need not be a true identity of `combine`; it is folded in
    /// exactly once, on the left, for every position.
    pub fn scan_exclusive<T, F>(&self, data: &mut [T], identity: T, combine: F) -> TaskResult<()>
    where
        T: Clone + Send + Sync,
        F: Fn(&T, &T) -> T + Sync,
    {
        if data.is_empty() {
            return Ok(());
        }

        if self.resolved_strategy() == ScanStrategy::Serial {
            scan_exclusive_serial(data, identity, &combine);
            return Ok(());
        }

        self.scan(data, &combine)?;
        data.rotate_right(1);
        data[0] = identity;

        // Seed the shifted prefixes so every strategy folds `identity` the same way
        let (seed, rest) = data.split_at_mut(1);
        let seed = &seed[0];
        let chunk_len = rest.len().div_ceil(self.workers).max(1);
        ParallelLoop::new(self.workers).for_each_chunk_mut(rest, chunk_len, |_, chunk| {
            for item in chunk.iter_mut() {
                *item = combine(seed, item);
            }
            Ok(())
        })
    }
}

/// Serial strided inclusive scan over `data[start]`, `data[start + stride]`, ...
pub fn scan_serial<T, F>(data: &mut [T], start: usize, stride: usize, combine: &F)
where
    F: Fn(&T, &T) -> T,
{
    let stride = stride.max(1);
    let mut i = start;
    while i + stride < data.len() {
        data[i + stride] = combine(&data[i], &data[i + stride]);
        i += stride;
    }
}

/// Serial exclusive scan carrying a running total from `identity`
pub fn scan_exclusive_serial<T, F>(data: &mut [T], identity: T, combine: &F)
where
    F: Fn(&T, &T) -> T,
{
    let mut total = identity;
    for slot in data.iter_mut() {
        let next = combine(&total, slot);
        *slot = std::mem::replace(&mut total, next);
    }
}

fn strided_count(len: usize, start: usize, stride: usize) -> usize {
    if start >= len { 0 } else { (len - start - 1) / stride + 1 }
}

fn scan_load_balanced<T, F>(
    engine: &ParallelLoop,
    data: &mut [T],
    start: usize,
    stride: usize,
    combine: &F,
) -> TaskResult<()>
where
    T: Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    if strided_count(data.len(), start, stride) <= LOAD_BALANCED_CUTOFF {
        scan_serial(data, start, stride, combine);
        return Ok(());
    }

    // Each 2*stride chunk holds one even/odd pair of the strided sequence
    let fold_pair = |_: usize, chunk: &mut [T]| -> TaskResult<()> {
        if chunk.len() > stride {
            chunk[stride] = combine(&chunk[0], &chunk[stride]);
        }
        Ok(())
    };

    engine.for_each_chunk_mut(&mut data[start..], 2 * stride, fold_pair)?;
    scan_load_balanced(engine, data, start + stride, 2 * stride, combine)?;
    // Shifted by one stride, the same pairing folds each finished odd
    // position into the even position after it
    engine.for_each_chunk_mut(&mut data[start + stride..], 2 * stride, fold_pair)
}

fn scan_barrier<T, F>(data: &mut [T], workers: usize, combine: &F) -> TaskResult<()>
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Sync,
{
    let parts = partition(0, data.len(), workers);
    let participants = parts.len();
    let chunks = split_by_partitions(data, &parts)?;

    let totals: Mutex<Vec<Option<T>>> = Mutex::new((0..participants).map(|_| None).collect());
    let prefixes: Mutex<Vec<Option<T>>> = Mutex::new((0..participants).map(|_| None).collect());

    let barrier = PhaseBarrier::with_action(participants, |_| {
        let totals = lock(&totals);
        let mut prefixes = lock(&prefixes);
        let mut running: Option<T> = None;
        for (index, total) in totals.iter().enumerate() {
            prefixes[index] = running.clone();
            running = match (running, total) {
                (Some(acc), Some(total)) => Some(combine(&acc, total)),
                (None, total) => total.clone(),
                (acc, None) => acc,
            };
        }
    });

    let (barrier_ref, totals, prefixes) = (&barrier, &totals, &prefixes);
    let tasks: Vec<_> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            move || {
                barrier_ref.guard(|| {
                    scan_serial(chunk, 0, 1, combine);
                    lock(totals)[index] = chunk.last().cloned();

                    barrier_ref.signal_and_wait()?;

                    if index > 0 {
                        let prefix = lock(prefixes)[index].clone();
                        if let Some(prefix) = prefix {
                            for item in chunk.iter_mut() {
                                *item = combine(&prefix, item);
                            }
                        }
                    }
                    Ok(())
                })
            }
        })
        .collect();

    fork_join_with(tasks, || barrier_ref.abort())
        .map(|_| ())
        .map_err(root_fault)
}
