//! Parallel Sort
//!
//! Barrier-synchronized bucket sort with a log-depth merge tournament.
//!
//! The input is cut into `P` contiguous buckets (`P` a power of two). `P`
//! participants sort their own bucket, meet at a `PhaseBarrier`, then for
//! `log2(P)` rounds pair up by index: in round `r` a participant whose
//! `index >> r` is odd deregisters, leaving its run in its slot, and its
//! surviving partner merges both runs into its own slot. Participant 0 ends
//! up holding the whole sorted sequence.
//!
//! Merges take from the lower bucket on ties, so the result is stable.

use std::cmp::Ordering;
use std::sync::Mutex;

use strand_runtime::{PhaseBarrier, RuntimeConfig, TaskResult, catch_task, fork_join_with, lock};

use crate::partition::partition;
use crate::root_fault;

/// Elements per worker below which sorting stays sequential
const SEQUENTIAL_CUTOFF_PER_WORKER: usize = 1024;

/// Parallel merge sort driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelSorter {
    parallelism: usize,
}

impl Default for ParallelSorter {
    fn default() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }
}

impl ParallelSorter {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self::new(config.workers)
    }

    /// Inputs shorter than this are sorted sequentially
    pub fn threshold(&self) -> usize {
        self.parallelism * SEQUENTIAL_CUTOFF_PER_WORKER
    }

    /// Number of buckets (and participants) of a parallel sort
    pub fn bucket_count(&self) -> usize {
        (2 * self.parallelism).next_power_of_two()
    }

    pub fn sort<T: Ord + Send>(&self, data: &mut Vec<T>) -> TaskResult<()> {
        self.sort_by(data, T::cmp)
    }

    /// Stable sort by `compare`.
    ///
    /// On a fault (a panicking comparator) `data` still holds every element,
    /// in unspecified order.
    pub fn sort_by<T, F>(&self, data: &mut Vec<T>, compare: F) -> TaskResult<()>
    where
        T: Send,
        F: Fn(&T, &T) -> Ordering + Sync,
    {
        if data.len() < self.threshold() {
            return catch_task(|| {
                data.sort_by(|a, b| compare(a, b));
                Ok(())
            });
        }

        let participants = self.bucket_count();
        let rounds = participants.trailing_zeros();
        tracing::debug!(
            "Sorting {} elements in {} buckets over {} merge rounds",
            data.len(),
            participants,
            rounds
        );

        // Runs stay in their slot while compared, so a panicking comparator
        // never takes elements down with it
        let mut source = std::mem::take(data);
        let parts = partition(0, source.len(), participants);
        let mut runs: Vec<Mutex<Vec<T>>> = Vec::with_capacity(parts.len());
        for part in parts.iter().rev() {
            runs.push(Mutex::new(source.split_off(part.start)));
        }
        runs.reverse();

        let barrier = PhaseBarrier::new(runs.len());
        let outcome = {
            let (barrier, runs, compare) = (&barrier, &runs, &compare);
            let tasks: Vec<_> = (0..runs.len())
                .map(|index| {
                    move || {
                        barrier.guard(|| {
                            lock(&runs[index]).sort_by(|a, b| compare(a, b));
                            barrier.signal_and_wait()?;

                            for round in 0..rounds {
                                if (index >> round) & 1 == 1 {
                                    return barrier.remove_participant();
                                }

                                barrier.signal_and_wait()?;
                                let partner = index + (1 << round);
                                let order = {
                                    let (own, other) = (lock(&runs[index]), lock(&runs[partner]));
                                    merge_order(own.as_slice(), other.as_slice(), compare)
                                };

                                let neighbour = std::mem::take(&mut *lock(&runs[partner]));
                                let mut own = lock(&runs[index]);
                                let merged = merge_by_order(std::mem::take(&mut *own), neighbour, &order);
                                *own = merged;
                            }
                            Ok(())
                        })
                    }
                })
                .collect();

            fork_join_with(tasks, || barrier.abort()).map(|_| ())
        };

        // Run 0 holds everything after a clean tournament; after a fault the
        // surviving runs are concatenated back
        *data = runs
            .into_iter()
            .flat_map(|run| match run.into_inner() {
                Ok(run) => run,
                Err(poisoned) => poisoned.into_inner(),
            })
            .collect();

        outcome.map_err(|err| {
            tracing::warn!("Parallel sort faulted; {} elements left unsorted", data.len());
            root_fault(err)
        })
    }
}

/// Which side each merged element comes from, for two sorted runs.
///
/// Only reads the runs, so a panicking `compare` leaves both intact. Ties
/// go to `left`; the tail after either run is exhausted is implied.
fn merge_order<T, F>(left: &[T], right: &[T], compare: &F) -> Vec<bool>
where
    F: Fn(&T, &T) -> Ordering,
{
    let (mut l, mut r) = (0, 0);
    let mut order = Vec::with_capacity(left.len() + right.len());
    while l < left.len() && r < right.len() {
        let take_left = compare(&left[l], &right[r]) != Ordering::Greater;
        if take_left {
            l += 1;
        } else {
            r += 1;
        }
        order.push(take_left);
    }
    order
}

/// Interleave two runs as `order` dictates, then append what is left
fn merge_by_order<T>(left: Vec<T>, right: Vec<T>, order: &[bool]) -> Vec<T> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut left, mut right) = (left.into_iter(), right.into_iter());
    for &take_left in order {
        out.extend(if take_left { left.next() } else { right.next() });
    }
    out.extend(left);
    out.extend(right);
    out
}

/// `sort` on a default-sized sorter
pub fn parallel_sort<T: Ord + Send>(data: &mut Vec<T>) -> TaskResult<()> {
    ParallelSorter::default().sort(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_runtime::TaskError;

    fn pseudo_random(len: usize, seed: u64) -> Vec<u64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state % 10_000
            })
            .collect()
    }

    #[test]
    fn test_bucket_count_is_power_of_two() {
        assert_eq!(ParallelSorter::new(1).bucket_count(), 2);
        assert_eq!(ParallelSorter::new(3).bucket_count(), 8);
        assert_eq!(ParallelSorter::new(4).bucket_count(), 8);
        assert_eq!(ParallelSorter::new(2).threshold(), 2048);
    }

    #[test]
    fn test_sizes_around_threshold() {
        let sorter = ParallelSorter::new(2);
        let threshold = sorter.threshold();

        for len in [0, 1, threshold - 1, threshold, threshold + 1, 20_000] {
            let mut data = pseudo_random(len, len as u64 + 1);
            let mut expected = data.clone();
            expected.sort();

            sorter.sort(&mut data).unwrap();
            assert_eq!(data, expected, "len = {len}");
        }
    }

    #[test]
    fn test_sort_by_is_stable() {
        let sorter = ParallelSorter::new(3);
        let mut data: Vec<(u64, usize)> = pseudo_random(10_000, 99)
            .into_iter()
            .map(|k| k % 50)
            .enumerate()
            .map(|(i, k)| (k, i))
            .collect();
        let mut expected = data.clone();
        expected.sort_by_key(|(k, _)| *k);

        sorter.sort_by(&mut data, |a, b| a.0.cmp(&b.0)).unwrap();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_descending_comparator() {
        let sorter = ParallelSorter::new(1);
        let mut data = pseudo_random(5000, 7);
        sorter.sort_by(&mut data, |a, b| b.cmp(a)).unwrap();
        assert!(data.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_panicking_comparator_is_reported() {
        let sorter = ParallelSorter::new(2);
        let mut data = pseudo_random(sorter.threshold() * 2, 3);
        let poison = data[100];

        let err = sorter
            .sort_by(&mut data, |a, b| {
                if *a == poison || *b == poison {
                    panic!("comparator fault");
                }
                a.cmp(b)
            })
            .unwrap_err();

        assert!(err.root_causes().iter().all(|e| matches!(e, TaskError::Panicked(_))));
    }

    #[test]
    fn test_panicking_comparator_keeps_every_element() {
        let sorter = ParallelSorter::new(2);
        let mut data: Vec<u64> = (0..4096).rev().collect();

        let err = sorter
            .sort_by(&mut data, |a, b| {
                if *a == 100 || *b == 100 {
                    panic!("comparator fault");
                }
                a.cmp(b)
            })
            .unwrap_err();
        assert!(matches!(err.root_causes()[0], TaskError::Panicked(_)));

        assert_eq!(data.len(), 4096);
        data.sort_unstable();
        assert_eq!(data, (0..4096).collect::<Vec<u64>>());
    }

    #[test]
    fn test_panic_below_threshold_is_captured() {
        let mut data: Vec<u32> = (0..50).rev().collect();
        let err = ParallelSorter::new(4)
            .sort_by(&mut data, |a, b| {
                if *a == 7 {
                    panic!("small fault");
                }
                a.cmp(b)
            })
            .unwrap_err();

        assert!(matches!(err, TaskError::Panicked(_)));
        assert_eq!(data.len(), 50);
    }

    #[test]
    fn test_merge_is_stable() {
        let left = vec![(1, 'a'), (3, 'a'), (5, 'a')];
        let right = vec![(1, 'b'), (2, 'b'), (5, 'b'), (9, 'b')];
        let order = merge_order(&left, &right, &|a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0));
        let out = merge_by_order(left, right, &order);

        assert_eq!(
            out,
            vec![(1, 'a'), (1, 'b'), (2, 'b'), (3, 'a'), (5, 'a'), (5, 'b'), (9, 'b')]
        );
    }
}
