//! Promises
//!
//! Single-assignment futures with continuation chaining. A `Promise` is the
//! read side, a `Completer` the write side; the first completion wins and
//! later ones are ignored. Continuations are handed to an `Executor`, so
//! the type is independent of any particular pool.
//!
//! Values are shared between every observer of a promise, so `T` must be
//! `Send + Sync`; reading a value out by `wait` additionally needs `Clone`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AggregateError, TaskError, TaskResult, catch_task};
use crate::lock;
use crate::pool::{Executor, ExecutorRef};

type Callback<T> = Box<dyn FnOnce(&TaskResult<T>) + Send + 'static>;

enum Slot<T> {
    Pending(Vec<Callback<T>>),
    Complete(Arc<TaskResult<T>>),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Read side of an eventually available outcome
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// Write side of a `Promise`; cloneable, first completion wins
pub struct Completer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*lock(&self.inner.slot) {
            Slot::Pending(callbacks) => format!("pending ({} continuations)", callbacks.len()),
            Slot::Complete(outcome) if outcome.is_ok() => "succeeded".to_string(),
            Slot::Complete(_) => "faulted".to_string(),
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Create an unresolved promise and its completer
    pub fn pending() -> (Promise<T>, Completer<T>) {
        let inner = Arc::new(Inner {
            slot: Mutex::new(Slot::Pending(Vec::new())),
            ready: Condvar::new(),
        });
        (
            Promise {
                inner: Arc::clone(&inner),
            },
            Completer { inner },
        )
    }

    /// Promise already holding `outcome`
    pub fn from_outcome(outcome: TaskResult<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Complete(Arc::new(outcome))),
                ready: Condvar::new(),
            }),
        }
    }

    /// Promise already holding a value
    pub fn completed(value: T) -> Self {
        Self::from_outcome(Ok(value))
    }

    /// Promise already holding a fault
    pub fn faulted(err: TaskError) -> Self {
        Self::from_outcome(Err(err))
    }

    /// Whether an outcome is available
    pub fn is_complete(&self) -> bool {
        matches!(&*lock(&self.inner.slot), Slot::Complete(_))
    }

    /// Whether the promise completed with a fault
    pub fn is_faulted(&self) -> bool {
        matches!(&*lock(&self.inner.slot), Slot::Complete(outcome) if outcome.is_err())
    }

    /// Shared outcome, if already available
    pub fn outcome(&self) -> Option<Arc<TaskResult<T>>> {
        match &*lock(&self.inner.slot) {
            Slot::Complete(outcome) => Some(Arc::clone(outcome)),
            Slot::Pending(_) => None,
        }
    }

    /// Block until the outcome is available
    pub fn wait_outcome(&self) -> Arc<TaskResult<T>> {
        let mut slot = lock(&self.inner.slot);
        loop {
            if let Slot::Complete(outcome) = &*slot {
                return Arc::clone(outcome);
            }
            slot = match self.inner.ready.wait(slot) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until the outcome is available or `timeout` elapses
    pub fn wait_outcome_timeout(&self, timeout: Duration) -> Option<Arc<TaskResult<T>>> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.inner.slot);
        loop {
            if let Slot::Complete(outcome) = &*slot {
                return Some(Arc::clone(outcome));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = match self.inner.ready.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Register a callback run exactly once with the outcome.
    ///
    /// Runs immediately on the calling thread if already complete,
    /// otherwise on whichever thread completes the promise.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&TaskResult<T>) + Send + 'static,
    {
        let outcome = {
            let mut slot = lock(&self.inner.slot);
            match &mut *slot {
                Slot::Pending(callbacks) => {
                    callbacks.push(Box::new(f));
                    return;
                }
                Slot::Complete(outcome) => Arc::clone(outcome),
            }
        };
        f(&outcome);
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Block until complete and return a copy of the outcome
    pub fn wait(&self) -> TaskResult<T> {
        (*self.wait_outcome()).clone()
    }

    /// Like `wait`, giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        self.wait_outcome_timeout(timeout)
            .map(|outcome| (*outcome).clone())
    }

    /// Outcome copy without blocking
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        self.outcome().map(|outcome| (*outcome).clone())
    }

    /// Schedule `f` on `executor` once this promise completes, whatever
    /// the outcome. A panic in `f` faults the returned promise.
    pub fn continue_with<U, F>(&self, executor: &ExecutorRef, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(TaskResult<T>) -> TaskResult<U> + Send + 'static,
    {
        let (promise, completer) = Promise::pending();
        let executor = Arc::clone(executor);
        self.on_complete(move |outcome| {
            let outcome = outcome.clone();
            executor.execute(Box::new(move || {
                completer.complete(catch_task(|| f(outcome)));
            }));
        });
        promise
    }

    /// Schedule `f` on success; a fault is passed through without running `f`
    pub fn then<U, F>(&self, executor: &ExecutorRef, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> TaskResult<U> + Send + 'static,
    {
        self.continue_with(executor, move |outcome| f(outcome?))
    }
}

impl<T: Send + Sync + 'static> Completer<T> {
    /// Store `outcome` if nothing was stored yet.
    ///
    /// Returns true for the single call that won; waiters are woken and
    /// registered continuations run on this thread.
    pub fn complete(&self, outcome: TaskResult<T>) -> bool {
        let outcome = Arc::new(outcome);
        let callbacks = {
            let mut slot = lock(&self.inner.slot);
            if matches!(&*slot, Slot::Complete(_)) {
                return false;
            }
            match std::mem::replace(&mut *slot, Slot::Complete(Arc::clone(&outcome))) {
                Slot::Pending(callbacks) => callbacks,
                Slot::Complete(_) => Vec::new(),
            }
        };
        self.inner.ready.notify_all();

        for callback in callbacks {
            // One misbehaving continuation must not starve the others
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&outcome))).is_err() {
                tracing::warn!("Promise continuation panicked");
            }
        }
        true
    }

    /// Complete with a value
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Complete with a fault
    pub fn fail(&self, err: TaskError) -> bool {
        self.complete(Err(err))
    }

    /// Whether an outcome was already stored
    pub fn is_complete(&self) -> bool {
        matches!(&*lock(&self.inner.slot), Slot::Complete(_))
    }
}

/// Run `f` on `executor`, capturing panics as faults
pub fn spawn<T, F, E>(executor: &E, f: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
    E: Executor + ?Sized,
{
    let (promise, completer) = Promise::pending();
    executor.execute(Box::new(move || {
        completer.complete(catch_task(f));
    }));
    promise
}

struct JoinState<T> {
    remaining: usize,
    values: Vec<Option<T>>,
    faults: Vec<(usize, TaskError)>,
}

/// Promise completing once every input completed.
///
/// Succeeds with the values in input order, or faults with an
/// `AggregateError` holding every input fault in input order.
pub fn when_all<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::completed(Vec::new());
    }

    let (all, completer) = Promise::pending();
    let state = Arc::new(Mutex::new(JoinState {
        remaining: promises.len(),
        values: (0..promises.len()).map(|_| None).collect(),
        faults: Vec::new(),
    }));

    for (index, promise) in promises.iter().enumerate() {
        let state = Arc::clone(&state);
        let completer = completer.clone();
        promise.on_complete(move |outcome| {
            let finished = {
                let mut join = lock(&state);
                match outcome {
                    Ok(value) => join.values[index] = Some(value.clone()),
                    Err(err) => join.faults.push((index, err.clone())),
                }
                join.remaining -= 1;
                if join.remaining == 0 {
                    Some(finish_join(&mut join))
                } else {
                    None
                }
            };
            if let Some(result) = finished {
                completer.complete(result);
            }
        });
    }

    all
}

fn finish_join<T>(join: &mut JoinState<T>) -> TaskResult<Vec<T>> {
    if join.faults.is_empty() {
        return Ok(std::mem::take(&mut join.values).into_iter().flatten().collect());
    }
    let mut faults = std::mem::take(&mut join.faults);
    faults.sort_by_key(|(index, _)| *index);
    Err(AggregateError::new(faults.into_iter().map(|(_, err)| err)).into())
}

/// Promise completing with the index and outcome of the first input to
/// complete, successful or not. Faults with `NoCandidates` when empty.
pub fn when_any<T>(promises: Vec<Promise<T>>) -> Promise<(usize, TaskResult<T>)>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::faulted(TaskError::NoCandidates);
    }

    let (any, completer) = Promise::pending();
    for (index, promise) in promises.iter().enumerate() {
        let completer = completer.clone();
        promise.on_complete(move |outcome| {
            completer.complete(Ok((index, outcome.clone())));
        });
    }
    any
}
