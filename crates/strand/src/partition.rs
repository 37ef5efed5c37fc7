//! Work Partitioning
//!
//! Splits a half-open index range into disjoint, near-equal sub-ranges.
//! The first `len % chunks` partitions are one element longer than the rest,
//! so any two partition sizes differ by at most one.

use std::fmt;
use std::ops::Range;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use strand_runtime::available_parallelism;

/// Integer domains that can be partitioned
///
/// Lengths are carried as `u128` so the full span of every supported type
/// (including `i64::MIN..i64::MAX`) is representable.
pub trait PartitionIndex: Copy + Ord + Send + Sync + fmt::Debug + 'static {
    /// Number of indices in `[from, to)`; caller guarantees `from < to`
    fn span(from: Self, to: Self) -> u128;

    /// `self + by`; caller guarantees the result is in range
    fn offset(self, by: u128) -> Self;
}

macro_rules! impl_partition_index {
    ($($t:ty),*) => {
        $(
            impl PartitionIndex for $t {
                #[inline]
                fn span(from: Self, to: Self) -> u128 {
                    (to as i128 - from as i128) as u128
                }

                #[inline]
                fn offset(self, by: u128) -> Self {
                    (self as i128 + by as i128) as $t
                }
            }
        )*
    };
}

impl_partition_index!(i32, i64, u32, u64, usize);

/// Half-open index range assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition<I> {
    pub start: I,
    pub end: I,
}

impl<I: PartitionIndex> Partition<I> {
    pub fn new(start: I, end: I) -> Self {
        Self { start, end }
    }

    /// Number of indices covered
    pub fn size(&self) -> u128 {
        if self.end <= self.start {
            0
        } else {
            I::span(self.start, self.end)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn range(&self) -> Range<I> {
        self.start..self.end
    }

    /// Every index in the partition, ascending
    pub fn indices(&self) -> impl Iterator<Item = I> + '_ {
        (0..self.size()).map(move |k| self.start.offset(k))
    }
}

impl Partition<usize> {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

impl<I: fmt::Display> fmt::Display for Partition<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Split `[from, to)` into at most `chunks` ordered, disjoint partitions.
///
/// `to <= from` yields nothing. A chunk count of zero is treated as one,
/// and the count is clamped to the range length so no partition is empty.
pub fn partition<I: PartitionIndex>(from: I, to: I, chunks: usize) -> Vec<Partition<I>> {
    if to <= from {
        return Vec::new();
    }

    let len = I::span(from, to);
    let count = (chunks.max(1) as u128).min(len);
    let base = len / count;
    let extra = len % count;

    let mut parts = Vec::with_capacity(count as usize);
    let mut start = from;
    for i in 0..count {
        let size = base + u128::from(i < extra);
        let end = start.offset(size);
        parts.push(Partition::new(start, end));
        start = end;
    }

    tracing::trace!("Partitioned {:?}..{:?} into {} chunks", from, to, parts.len());
    parts
}

/// Partition using the available hardware parallelism as chunk count
pub fn partition_default<I: PartitionIndex>(from: I, to: I) -> Vec<Partition<I>> {
    partition(from, to, available_parallelism())
}

/// Exact partitioning of an arbitrary-precision range
pub fn partition_big(from: &BigInt, to: &BigInt, chunks: usize) -> Vec<Partition<BigInt>> {
    if to <= from {
        return Vec::new();
    }

    let len: BigInt = to - from;
    let count = match len.to_usize() {
        Some(len) => chunks.max(1).min(len),
        None => chunks.max(1),
    };
    let count_big = BigInt::from(count);
    let base = &len / &count_big;
    let extra = (&len % &count_big).to_usize().unwrap_or(0);

    let mut parts = Vec::with_capacity(count);
    let mut start = from.clone();
    for i in 0..count {
        let mut end = &start + &base;
        if i < extra {
            end += 1;
        }
        parts.push(Partition {
            start: std::mem::replace(&mut start, end.clone()),
            end,
        });
    }
    debug_assert!(parts.last().is_none_or(|p| &p.end == to));
    debug_assert!(parts.iter().all(|p| !(&p.end - &p.start).is_zero()));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers<I: PartitionIndex>(parts: &[Partition<I>], from: I, to: I) {
        assert_eq!(parts.first().map(|p| p.start), Some(from));
        assert_eq!(parts.last().map(|p| p.end), Some(to));
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let sizes: Vec<u128> = parts.iter().map(Partition::size).collect();
        let min = sizes.iter().min().copied().unwrap_or(0);
        let max = sizes.iter().max().copied().unwrap_or(0);
        assert!(max - min <= 1, "uneven sizes {sizes:?}");
        assert!(min >= 1);
    }

    #[test]
    fn test_even_split() {
        let parts = partition(0usize, 10, 3);
        assert_eq!(
            parts,
            vec![Partition::new(0, 4), Partition::new(4, 7), Partition::new(7, 10)]
        );
    }

    #[test]
    fn test_empty_and_reversed() {
        assert!(partition(5i32, 5, 4).is_empty());
        assert!(partition(7i64, 2, 4).is_empty());
    }

    #[test]
    fn test_chunk_count_clamped() {
        let parts = partition(0u32, 3, 16);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.size() == 1));

        let parts = partition(0u64, 9, 0);
        assert_eq!(parts, vec![Partition::new(0, 9)]);
    }

    #[test]
    fn test_negative_and_extreme_ranges() {
        let parts = partition(-50i32, 50, 7);
        assert_covers(&parts, -50, 50);

        let parts = partition(i64::MIN, i64::MAX, 8);
        assert_covers(&parts, i64::MIN, i64::MAX);

        let parts = partition(0u64, u64::MAX, 5);
        assert_covers(&parts, 0, u64::MAX);
    }

    #[test]
    fn test_indices() {
        let part = Partition::new(-2i32, 2);
        assert_eq!(part.indices().collect::<Vec<_>>(), vec![-2, -1, 0, 1]);
        assert_eq!(part.to_string(), "[-2, 2)");
    }

    #[test]
    fn test_partition_default_covers() {
        let parts = partition_default(0usize, 1000);
        assert_covers(&parts, 0, 1000);
    }

    #[test]
    fn test_partition_big() {
        let from = BigInt::from(i64::MAX) * 4;
        let to = &from + 10;
        let parts = partition_big(&from, &to, 4);

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].start, from);
        assert_eq!(parts[3].end, to);
        let sizes: Vec<BigInt> = parts.iter().map(|p| &p.end - &p.start).collect();
        assert_eq!(sizes, vec![3.into(), 3.into(), 2.into(), 2.into()]);

        assert!(partition_big(&to, &from, 4).is_empty());
        assert_eq!(partition_big(&from, &(&from + 2), 8).len(), 2);
    }
}
