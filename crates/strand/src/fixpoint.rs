//! Work-Queue Fixpoint
//!
//! Drains a work set in rounds until no new work appears. Each round runs
//! every item of the current buffer on the executor; bodies push follow-up
//! items into the next buffer through an `Emitter`. At the round boundary
//! the buffers swap and the new next buffer starts out empty.
//!
//! There is no round limit. A body that keeps emitting for every item it
//! processes never terminates; bounding the work is the caller's job.

use std::sync::{Arc, Mutex};

use strand_runtime::{
    CancellationToken, ExecutorRef, Promise, TaskResult, lock, spawn, when_all,
};

/// Handle bodies use to enqueue items for the next round
pub struct Emitter<T> {
    next: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            next: Arc::clone(&self.next),
        }
    }
}

impl<T> Emitter<T> {
    pub fn emit(&self, item: T) {
        lock(&self.next).push(item);
    }

    pub fn emit_all(&self, items: impl IntoIterator<Item = T>) {
        lock(&self.next).extend(items);
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("queued", &lock(&self.next).len())
            .finish()
    }
}

/// Summary of a completed drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixpointReport {
    /// Rounds that processed at least one item
    pub rounds: usize,
    pub items_processed: usize,
}

/// Round-based fixpoint driver
#[derive(Clone)]
pub struct Fixpoint {
    executor: ExecutorRef,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for Fixpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixpoint")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Fixpoint {
    pub fn new(executor: ExecutorRef) -> Self {
        Self {
            executor,
            cancel: None,
        }
    }

    /// Check `token` before every round
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Process `initial` and everything it transitively emits.
    ///
    /// Blocks the calling thread at every round boundary, so it must not be
    /// called from a job of a pool whose workers the rounds need. The first
    /// faulted round ends the drain with that round's faults.
    pub fn drain<T, F>(&self, initial: impl IntoIterator<Item = T>, body: F) -> TaskResult<FixpointReport>
    where
        T: Send + 'static,
        F: Fn(T, &Emitter<T>) -> TaskResult<()> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let mut current: Vec<T> = initial.into_iter().collect();
        let next = Arc::new(Mutex::new(Vec::new()));
        let emitter = Emitter {
            next: Arc::clone(&next),
        };
        let mut report = FixpointReport::default();

        while !current.is_empty() {
            if let Some(token) = &self.cancel {
                token.check()?;
            }

            report.rounds += 1;
            report.items_processed += current.len();
            tracing::trace!("Fixpoint round {} with {} items", report.rounds, current.len());

            let round: Vec<Promise<()>> = current
                .drain(..)
                .map(|item| {
                    let body = Arc::clone(&body);
                    let emitter = emitter.clone();
                    spawn(&self.executor, move || body(item, &emitter))
                })
                .collect();

            if let Err(err) = when_all(round).wait() {
                tracing::warn!("Fixpoint round {} faulted: {}", report.rounds, err);
                return Err(err);
            }

            // The drained buffer becomes the empty "next" for the coming round
            std::mem::swap(&mut current, &mut *lock(&next));
        }

        tracing::debug!(
            "Fixpoint reached after {} rounds ({} items)",
            report.rounds,
            report.items_processed
        );
        Ok(report)
    }
}
