//! End-to-end checks of the promise-based primitives on a shared pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use strand::runtime::{RuntimeConfig, ThreadPool, lock};
use strand::{CancellationToken, Fixpoint, TaskError, TaskResult, Wavefront, race, race_each};

fn pool() -> ThreadPool {
    ThreadPool::with_config(&RuntimeConfig::with_workers(4).thread_name("strand-test")).unwrap()
}

#[test]
fn wavefront_blocks_follow_top_left_order() {
    let pool = pool();
    let clock = Arc::new(AtomicUsize::new(0));
    let finished: Arc<Mutex<Vec<((usize, usize), usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let (c, f) = (Arc::clone(&clock), Arc::clone(&finished));
    Wavefront::new(pool.executor_ref())
        .run_blocks(40, 30, 5, 4, move |bounds| {
            let start = c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(200));
            let end = c.fetch_add(1, Ordering::SeqCst);
            lock(&f).push(((bounds.start_row, bounds.start_col), start, end));
            Ok(())
        })
        .unwrap();

    let finished = lock(&finished);
    assert_eq!(finished.len(), 20);

    let stamp = |row: usize, col: usize| {
        finished
            .iter()
            .find(|(origin, _, _)| *origin == (row, col))
            .map(|&(_, start, end)| (start, end))
            .unwrap()
    };
    for br in 0..5 {
        for bc in 0..4 {
            let (start, _) = stamp(br * 8, bc * 7);
            if br > 0 {
                assert!(stamp((br - 1) * 8, bc * 7).1 < start);
            }
            if bc > 0 {
                assert!(stamp(br * 8, (bc - 1) * 7).1 < start);
            }
        }
    }
}

#[test]
fn wavefront_reports_every_independent_fault() {
    let pool = pool();
    let err = Wavefront::new(pool.executor_ref())
        .run_cells(3, 3, |row, col| {
            if (row, col) == (0, 2) || (row, col) == (2, 0) {
                Err(TaskError::msg(format!("cell {row},{col}")))
            } else {
                Ok(())
            }
        })
        .unwrap_err();

    match err {
        TaskError::Aggregate(agg) => assert_eq!(agg.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn race_adopts_fastest_across_runs() {
    let pool = pool();
    for _ in 0..10 {
        let winner = race_each(&pool, [90u64, 5, 45, 70], |delay, stop| {
            for _ in 0..delay {
                if stop.is_cancelled() {
                    return Err(TaskError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(delay)
        });
        assert_eq!(winner.wait().unwrap(), 5);
    }
}

#[test]
fn race_of_failures_faults() {
    let pool = pool();
    let candidates: Vec<Box<dyn FnOnce(&CancellationToken) -> TaskResult<u8> + Send>> = (0..4)
        .map(|i| -> Box<dyn FnOnce(&CancellationToken) -> TaskResult<u8> + Send> {
            Box::new(move |_: &CancellationToken| -> TaskResult<u8> {
                Err(TaskError::msg(format!("candidate {i}")))
            })
        })
        .collect();

    let err = race(&pool, candidates).wait().unwrap_err();
    assert_eq!(err.root_causes().len(), 4);
}

#[test]
fn fixpoint_collatz_closure() {
    // Every number reached from the seeds by Collatz steps, visited once
    let pool = pool();
    let visited = Arc::new(Mutex::new(std::collections::BTreeSet::new()));
    let v = Arc::clone(&visited);

    let report = Fixpoint::new(pool.executor_ref())
        .drain([7u64, 12, 27], move |n, emit| {
            if !lock(&v).insert(n) || n == 1 {
                return Ok(());
            }
            emit.emit(if n % 2 == 0 { n / 2 } else { 3 * n + 1 });
            Ok(())
        })
        .unwrap();

    let visited = lock(&visited);
    assert!(visited.contains(&1));
    assert!(visited.contains(&9232));
    assert!(report.items_processed >= visited.len());
}
