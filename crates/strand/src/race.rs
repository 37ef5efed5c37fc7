//! Speculative Racing
//!
//! Launches redundant candidates concurrently and adopts the first success.
//! The winner is stored through the promise's first-writer-wins completer,
//! then a shared stop token is cancelled: candidates that have not started
//! yet are skipped and running ones may poll the token to stop early. Late
//! results are dropped.
//!
//! If every candidate faults the race faults with an `AggregateError`
//! holding every candidate fault in candidate order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strand_runtime::{
    AggregateError, CancellationToken, Completer, Executor, Promise, TaskError, TaskResult,
    catch_task, lock,
};

struct RaceState<T> {
    completer: Completer<T>,
    stop: CancellationToken,
    remaining: AtomicUsize,
    faults: Mutex<Vec<(usize, TaskError)>>,
}

impl<T: Send + Sync + 'static> RaceState<T> {
    fn finish(&self, index: usize, outcome: TaskResult<T>) {
        match outcome {
            Ok(value) => {
                if self.completer.succeed(value) {
                    self.stop.cancel();
                    tracing::debug!("Race won by candidate {}", index);
                }
            }
            Err(err) => lock(&self.faults).push((index, err)),
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 && !self.completer.is_complete() {
            let mut faults = std::mem::take(&mut *lock(&self.faults));
            faults.sort_by_key(|(index, _)| *index);
            tracing::warn!("Every race candidate faulted ({})", faults.len());
            self.completer
                .fail(AggregateError::new(faults.into_iter().map(|(_, err)| err)).into());
        }
    }
}

/// Race `candidates` on `executor`; the first success wins.
///
/// Each candidate receives the shared stop token. An empty candidate list
/// faults with `TaskError::NoCandidates`.
pub fn race<T, F, E>(executor: &E, candidates: impl IntoIterator<Item = F>) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
    E: Executor + ?Sized,
{
    let candidates: Vec<F> = candidates.into_iter().collect();
    if candidates.is_empty() {
        return Promise::faulted(TaskError::NoCandidates);
    }

    tracing::debug!("Racing {} candidates", candidates.len());
    let (promise, completer) = Promise::pending();
    let state = Arc::new(RaceState {
        completer,
        stop: CancellationToken::new(),
        remaining: AtomicUsize::new(candidates.len()),
        faults: Mutex::new(Vec::new()),
    });

    for (index, candidate) in candidates.into_iter().enumerate() {
        let state = Arc::clone(&state);
        executor.execute(Box::new(move || {
            let outcome = if state.stop.is_cancelled() {
                Err(TaskError::Cancelled)
            } else {
                catch_task(|| candidate(&state.stop))
            };
            state.finish(index, outcome);
        }));
    }

    promise
}

/// Race candidates that all read the same `input`
pub fn race_with_input<T, I, F, E>(
    executor: &E,
    input: I,
    candidates: impl IntoIterator<Item = F>,
) -> Promise<T>
where
    T: Send + Sync + 'static,
    I: Send + Sync + 'static,
    F: FnOnce(&I, &CancellationToken) -> TaskResult<T> + Send + 'static,
    E: Executor + ?Sized,
{
    let input = Arc::new(input);
    race(
        executor,
        candidates.into_iter().map(|candidate| {
            let input = Arc::clone(&input);
            move |stop: &CancellationToken| candidate(&*input, stop)
        }),
    )
}

/// Speculative for-each: run `body` on every input and adopt the first
/// success
pub fn race_each<T, I, F, E>(executor: &E, inputs: impl IntoIterator<Item = I>, body: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    I: Send + 'static,
    F: Fn(I, &CancellationToken) -> TaskResult<T> + Send + Sync + 'static,
    E: Executor + ?Sized,
{
    let body = Arc::new(body);
    race(
        executor,
        inputs.into_iter().map(|input| {
            let body = Arc::clone(&body);
            move |stop: &CancellationToken| body(input, stop)
        }),
    )
}
