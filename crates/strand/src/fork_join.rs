//! Parallel Loop Engine
//!
//! Fork-join execution of a partitioned index range. Every partition runs as
//! one participant of a scoped `fork_join`, so bodies may borrow from the
//! caller's stack. Per-partition local state is folded privately and only
//! handed to a finalize step once the partition is done.

use std::ops::Range;
use std::sync::Mutex;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use strand_runtime::{
    CancellationToken, RuntimeConfig, TaskError, TaskResult, catch_task, fork_join, lock,
};

use crate::partition::{Partition, PartitionIndex, partition};

/// Fork-join loop over partitioned index ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelLoop {
    workers: usize,
}

impl Default for ParallelLoop {
    fn default() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }
}

impl ParallelLoop {
    /// Loop engine with an explicit worker count (at least one)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Partitions of `[0, len)`, one per worker at most
    pub fn partitions(&self, len: usize) -> Vec<Partition<usize>> {
        partition(0, len, self.workers)
    }

    /// Run `body` once per partition of `[0, len)`
    pub fn for_each_partition<F>(&self, len: usize, body: F) -> TaskResult<()>
    where
        F: Fn(Partition<usize>) -> TaskResult<()> + Sync,
    {
        let parts = self.partitions(len);
        tracing::trace!("Fork-join over {} items in {} partitions", len, parts.len());

        let body = &body;
        let tasks: Vec<_> = parts.into_iter().map(|part| move || body(part)).collect();
        fork_join(tasks).map(|_| ())
    }

    /// Run `body` for every index of `range`
    pub fn for_each<I, F>(&self, range: Range<I>, body: F) -> TaskResult<()>
    where
        I: PartitionIndex,
        F: Fn(I) -> TaskResult<()> + Sync,
    {
        self.for_each_with_local(range, || (), |i, _| body(i), |_, _| Ok(()))
    }

    /// Loop with per-partition local state.
    ///
    /// Each partition starts from `init()`, folds every index through
    /// `body(i, &mut local)`, then hands the local to `finalize`. Finalize
    /// calls run concurrently; any shared result they touch must be
    /// synchronized by the caller.
    pub fn for_each_with_local<I, L, Init, Body, Fin>(
        &self,
        range: Range<I>,
        init: Init,
        body: Body,
        finalize: Fin,
    ) -> TaskResult<()>
    where
        I: PartitionIndex,
        Init: Fn() -> L + Sync,
        Body: Fn(I, &mut L) -> TaskResult<()> + Sync,
        Fin: Fn(Partition<I>, L) -> TaskResult<()> + Sync,
    {
        let parts = partition(range.start, range.end, self.workers);
        let (init, body, finalize) = (&init, &body, &finalize);

        let tasks: Vec<_> = parts
            .into_iter()
            .map(|part| {
                move || -> TaskResult<()> {
                    let mut local = init();
                    for i in part.indices() {
                        body(i, &mut local)?;
                    }
                    finalize(part, local)
                }
            })
            .collect();

        fork_join(tasks).map(|_| ())
    }

    /// Parallel pass over the disjoint `chunk_len`-sized chunks of `data`.
    ///
    /// `body` receives the chunk index and the chunk; chunks are spread
    /// over the workers in contiguous runs.
    pub fn for_each_chunk_mut<T, F>(&self, data: &mut [T], chunk_len: usize, body: F) -> TaskResult<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> TaskResult<()> + Sync,
    {
        let chunks: Vec<(usize, &mut [T])> = data.chunks_mut(chunk_len.max(1)).enumerate().collect();
        let parts = self.partitions(chunks.len());

        let mut rest = chunks.into_iter();
        let groups: Vec<Vec<(usize, &mut [T])>> = parts
            .iter()
            .map(|part| rest.by_ref().take(part.len()).collect())
            .collect();

        let body = &body;
        let tasks: Vec<_> = groups
            .into_iter()
            .map(|group| {
                move || -> TaskResult<()> {
                    for (index, chunk) in group {
                        body(index, chunk)?;
                    }
                    Ok(())
                }
            })
            .collect();

        fork_join(tasks).map(|_| ())
    }

    /// Run `body` for every value of an arbitrary-precision range.
    ///
    /// Spans that fit in `i64` go through the regular partitioned loop.
    /// Larger spans are enumerated lazily: workers pull the next value from
    /// a shared cursor until the range is exhausted or a body faults. The
    /// first fault stops every worker before its next pull.
    pub fn for_each_big<F>(&self, from: &BigInt, to: &BigInt, body: F) -> TaskResult<()>
    where
        F: Fn(BigInt) -> TaskResult<()> + Sync,
    {
        if to <= from {
            return Ok(());
        }

        let span: BigInt = to - from;
        if let Some(len) = span.to_i64() {
            return self.for_each(0..len, |offset| body(from + offset));
        }

        tracing::debug!("Range span {} exceeds i64; enumerating lazily", span);
        let cursor = Mutex::new(from.clone());
        let stop = CancellationToken::new();
        let (cursor, stop, body) = (&cursor, &stop, &body);

        let tasks: Vec<_> = (0..self.workers)
            .map(|_| {
                move || -> TaskResult<()> {
                    loop {
                        if stop.is_cancelled() {
                            return Ok(());
                        }
                        let next = {
                            let mut cursor = lock(cursor);
                            if &*cursor >= to {
                                return Ok(());
                            }
                            let next = cursor.clone();
                            *cursor += 1;
                            next
                        };
                        if let Err(err) = catch_task(|| body(next)) {
                            stop.cancel();
                            return Err(err);
                        }
                    }
                }
            })
            .collect();

        fork_join(tasks).map(|_| ())
    }
}

/// Carve `data` into one mutable slice per partition.
///
/// Partitions must be ascending, disjoint and inside `data`; indices between
/// partitions are skipped. The slices come from repeated `split_at_mut`, so
/// they can never alias.
pub fn split_by_partitions<'a, T>(
    data: &'a mut [T],
    parts: &[Partition<usize>],
) -> TaskResult<Vec<&'a mut [T]>> {
    let mut rest = data;
    let mut offset = 0;
    let mut slices = Vec::with_capacity(parts.len());

    for part in parts {
        if part.start < offset || part.end < part.start || part.end - offset > rest.len() {
            return Err(TaskError::InvalidArgument(format!(
                "partition {} overlaps or exceeds slice of length {}",
                part,
                offset + rest.len()
            )));
        }
        let tail = std::mem::take(&mut rest);
        let (_, tail) = tail.split_at_mut(part.start - offset);
        let (head, tail) = tail.split_at_mut(part.len());
        slices.push(head);
        rest = tail;
        offset = part.end;
    }

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_for_each_visits_every_index_once() {
        let hits: Vec<AtomicUsize> = (0..257).map(|_| AtomicUsize::new(0)).collect();
        ParallelLoop::new(4)
            .for_each(0..257usize, |i| {
                hits[i].fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_local_state_finalized_per_partition() {
        let total = Mutex::new(0i64);
        let finalized = AtomicUsize::new(0);

        ParallelLoop::new(3)
            .for_each_with_local(
                -10i64..20,
                || 0i64,
                |i, acc| {
                    *acc += i;
                    Ok(())
                },
                |_, acc| {
                    finalized.fetch_add(1, Ordering::SeqCst);
                    *lock(&total) += acc;
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(*lock(&total), (-10i64..20).sum::<i64>());
        assert_eq!(finalized.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_body_fault_surfaces_at_join() {
        let err = ParallelLoop::new(4)
            .for_each(0..100u32, |i| {
                if i == 77 {
                    Err(TaskError::msg("bad index"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        match err {
            TaskError::Aggregate(agg) => assert_eq!(agg.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chunk_mut_pass() {
        let mut data: Vec<usize> = vec![0; 23];
        ParallelLoop::new(3)
            .for_each_chunk_mut(&mut data, 5, |index, chunk| {
                chunk.fill(index);
                Ok(())
            })
            .unwrap();

        let expected: Vec<usize> = (0..23).map(|i| i / 5).collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_split_by_partitions_is_disjoint() {
        let mut data: Vec<u8> = (0..10).collect();
        let parts = partition(0usize, 10, 3);
        let slices = split_by_partitions(&mut data, &parts).unwrap();

        assert_eq!(slices.len(), 3);
        let mut seen = Vec::new();
        for (slice, part) in slices.iter().zip(&parts) {
            assert_eq!(slice.len(), part.len());
            assert_eq!(slice.first().copied(), Some(part.start as u8));
            seen.extend_from_slice(slice);
        }
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_split_rejects_overlap() {
        let mut data = [0u8; 8];
        let overlapping = vec![Partition::new(0, 5), Partition::new(4, 8)];
        assert!(matches!(
            split_by_partitions(&mut data, &overlapping),
            Err(TaskError::InvalidArgument(_))
        ));

        let past_end = vec![Partition::new(2, 9)];
        assert!(split_by_partitions(&mut data, &past_end).is_err());
    }

    #[test]
    fn test_for_each_big_small_span() {
        let from = BigInt::from(u64::MAX) * 3;
        let to = &from + 40;
        let sum = Mutex::new(BigInt::from(0));

        ParallelLoop::new(4)
            .for_each_big(&from, &to, |v| {
                *lock(&sum) += v;
                Ok(())
            })
            .unwrap();

        let expected: BigInt = (0..40).map(|k| &from + k).sum();
        assert_eq!(*lock(&sum), expected);
    }

    #[test]
    fn test_for_each_big_lazy_enumeration() {
        // Span wider than i64 but the body stops it early
        let from = BigInt::from(0);
        let to = BigInt::from(i64::MAX) * 4;
        let seen = AtomicUsize::new(0);

        let err = ParallelLoop::new(2)
            .for_each_big(&from, &to, |v| {
                seen.fetch_add(1, Ordering::SeqCst);
                if v >= BigInt::from(64) {
                    Err(TaskError::Cancelled)
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert!(err.root_causes().iter().all(TaskError::is_cancelled));
        assert!(seen.load(Ordering::SeqCst) >= 65);
    }

    #[test]
    fn test_for_each_big_single_fault_stops_all_workers() {
        // Only one value faults; the rest of the span is far too wide to finish
        let from = BigInt::from(0);
        let to = BigInt::from(i64::MAX) * 4;

        let err = ParallelLoop::new(2)
            .for_each_big(&from, &to, |v| {
                if v == BigInt::from(5) {
                    return Err(TaskError::msg("bad value"));
                }
                std::thread::sleep(std::time::Duration::from_micros(50));
                Ok(())
            })
            .unwrap_err();

        let roots = err.root_causes();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].to_string(), "task failed: bad value");
    }

    #[test]
    fn test_for_each_big_panic_stops_all_workers() {
        let from = BigInt::from(-3);
        let to = BigInt::from(u64::MAX) * 2;

        let err = ParallelLoop::new(3)
            .for_each_big(&from, &to, |v| {
                if v == BigInt::from(40) {
                    panic!("body panic");
                }
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err.root_causes()[..], [TaskError::Panicked(_)]));
    }
}
