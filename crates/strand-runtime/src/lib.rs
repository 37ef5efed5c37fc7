//! Strand Runtime
//!
//! The execution substrate the parallel primitives are built on.
//!
//! # Components
//! - `ThreadPool` / `Executor`: job submission
//! - `Promise` / `Completer`: single-assignment futures with
//!   `continue_with`, `when_all` and `when_any`
//! - `PhaseBarrier`: reusable rendezvous with a post-phase action
//! - `fork_join`: scoped concurrent execution of borrowed closures
//! - `CancellationToken`: cooperative stop signal
//! - `TaskError` / `AggregateError`: fault capture and aggregation
//!
//! Logging goes through `tracing`; installing a subscriber is left to the
//! application.

pub mod barrier;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fork;
pub mod pool;
pub mod promise;

use std::sync::{Mutex, MutexGuard};

pub use barrier::PhaseBarrier;
pub use cancel::CancellationToken;
pub use config::{RuntimeConfig, available_parallelism};
pub use error::{AggregateError, TaskError, TaskResult, catch_task, join_outcomes};
pub use fork::{fork_join, fork_join_with};
pub use pool::{Executor, ExecutorRef, InlineExecutor, Job, PoolExecutor, ThreadPool};
pub use promise::{Completer, Promise, spawn, when_all, when_any};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
///
/// Every panic inside this workspace is already captured and reported as a
/// `TaskError`, so poisoning carries no extra information.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
