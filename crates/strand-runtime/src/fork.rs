//! Scoped Fork-Join
//!
//! Runs a batch of borrowed closures concurrently and joins them. The first
//! closure runs on the calling thread, every other one on its own scoped
//! thread, so all participants are live at once. Barrier-based algorithms
//! rely on that: a pool with fewer workers than participants would deadlock.

use std::thread;

use crate::error::{TaskError, TaskResult, catch_task, join_outcomes};

/// Run every task concurrently and collect results in task order.
///
/// Panics and faults from any branch are joined into one
/// `TaskError::Aggregate`.
pub fn fork_join<R, F>(tasks: Vec<F>) -> TaskResult<Vec<R>>
where
    R: Send,
    F: FnOnce() -> TaskResult<R> + Send,
{
    fork_join_with(tasks, || {})
}

/// Like `fork_join`, calling `on_spawn_failure` if a thread cannot be
/// started. Callers whose tasks rendezvous use it to break their barrier.
pub fn fork_join_with<R, F, A>(tasks: Vec<F>, on_spawn_failure: A) -> TaskResult<Vec<R>>
where
    R: Send,
    F: FnOnce() -> TaskResult<R> + Send,
    A: Fn(),
{
    let mut tasks = tasks.into_iter();
    let Some(first) = tasks.next() else {
        return Ok(Vec::new());
    };

    thread::scope(|s| {
        let mut spawned = Vec::new();
        let mut outcomes: Vec<TaskResult<R>> = Vec::new();
        let mut spawn_faults = Vec::new();

        for (index, task) in tasks.enumerate() {
            let builder = thread::Builder::new().name(format!("strand-fork-{}", index + 1));
            match builder.spawn_scoped(s, move || catch_task(task)) {
                Ok(handle) => spawned.push(handle),
                Err(err) => {
                    tracing::warn!("Failed to spawn fork-join participant: {}", err);
                    on_spawn_failure();
                    spawn_faults.push(TaskError::failed(err));
                }
            }
        }

        outcomes.push(catch_task(first));
        for handle in spawned {
            outcomes.push(match handle.join() {
                Ok(outcome) => outcome,
                Err(payload) => Err(TaskError::from_panic(payload)),
            });
        }
        outcomes.extend(spawn_faults.into_iter().map(Err));

        join_outcomes(outcomes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_join_in_order() {
        let tasks: Vec<_> = (0..6).map(|i| move || Ok(i * 10)).collect();
        assert_eq!(fork_join(tasks).unwrap(), vec![0, 10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_borrows_environment() {
        let data = vec![1, 2, 3, 4];
        let hits = AtomicUsize::new(0);

        let tasks: Vec<_> = data
            .chunks(2)
            .map(|chunk| {
                let hits = &hits;
                move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(chunk.iter().sum::<i32>())
                }
            })
            .collect();

        assert_eq!(fork_join(tasks).unwrap(), vec![3, 7]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_faults_are_aggregated() {
        let tasks: Vec<Box<dyn FnOnce() -> TaskResult<u8> + Send>> = vec![
            Box::new(|| -> TaskResult<u8> { Ok(1) }),
            Box::new(|| -> TaskResult<u8> { panic!("left") }),
            Box::new(|| -> TaskResult<u8> { Err(TaskError::msg("right")) }),
        ];

        match fork_join(tasks).unwrap_err() {
            TaskError::Aggregate(agg) => {
                assert_eq!(agg.len(), 2);
                assert!(matches!(agg.causes()[0], TaskError::Panicked(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty() {
        let tasks: Vec<fn() -> TaskResult<u8>> = Vec::new();
        assert!(fork_join(tasks).unwrap().is_empty());
    }
}
