use proptest::prelude::*;
use strand::{ParallelLoop, ParallelSorter, PrefixScan, ScanStrategy, partition};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partitions_cover_range(from in -10_000i64..10_000, len in 0i64..5_000, chunks in 0usize..40) {
        let to = from + len;
        let parts = partition(from, to, chunks);

        if len == 0 {
            prop_assert!(parts.is_empty());
        } else {
            prop_assert_eq!(parts[0].start, from);
            prop_assert_eq!(parts[parts.len() - 1].end, to);
            prop_assert!(parts.len() <= chunks.max(1));
            for pair in parts.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert!(pair[0].size() >= pair[1].size());
                prop_assert!(pair[0].size() - pair[1].size() <= 1);
            }
        }
    }

    #[test]
    fn map_preserves_index_correspondence(
        inputs in prop::collection::vec(any::<i32>(), 0..600),
        workers in 1usize..9,
    ) {
        let out = ParallelLoop::new(workers)
            .map(&inputs, |x| i64::from(*x) * 3 - 1)
            .unwrap();
        prop_assert_eq!(out.len(), inputs.len());
        for (x, y) in inputs.iter().zip(&out) {
            prop_assert_eq!(i64::from(*x) * 3 - 1, *y);
        }
    }

    #[test]
    fn filter_keeps_the_matching_multiset(
        inputs in prop::collection::vec(0u16..1000, 0..600),
        workers in 1usize..9,
    ) {
        let mut out = ParallelLoop::new(workers).filter(&inputs, |x| x % 4 != 0).unwrap();
        let mut expected: Vec<u16> = inputs.iter().copied().filter(|x| x % 4 != 0).collect();
        out.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn reduce_ignores_worker_count(
        inputs in prop::collection::vec(-1_000_000i64..1_000_000, 0..600),
        workers in 1usize..9,
    ) {
        let engine = ParallelLoop::new(workers);
        prop_assert_eq!(engine.reduce(&inputs, 0, |a, b| a + b).unwrap(), inputs.iter().sum::<i64>());
        prop_assert_eq!(
            engine.reduce(&inputs, i64::MIN, i64::max).unwrap(),
            inputs.iter().copied().max().unwrap_or(i64::MIN)
        );
    }

    #[test]
    fn scan_strategies_are_identical(inputs in prop::collection::vec(-1000i64..1000, 0..700)) {
        let mut expected = inputs.clone();
        PrefixScan::new(1).strategy(ScanStrategy::Serial).scan(&mut expected, |a, b| a + b).unwrap();

        for workers in [1usize, 2, 3, 8] {
            for strategy in [ScanStrategy::LoadBalanced, ScanStrategy::Barrier, ScanStrategy::Auto] {
                let mut data = inputs.clone();
                PrefixScan::new(workers).strategy(strategy).scan(&mut data, |a, b| a + b).unwrap();
                prop_assert_eq!(&data, &expected);
            }
        }
    }

    #[test]
    fn sort_matches_sequential(inputs in prop::collection::vec(any::<u32>(), 0..6000)) {
        let mut data = inputs.clone();
        let mut expected = inputs;
        expected.sort();

        ParallelSorter::new(2).sort(&mut data).unwrap();
        prop_assert_eq!(data, expected);
    }
}
