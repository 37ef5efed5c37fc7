//! Thread Pool
//!
//! Fixed-size worker pool using std::thread, plus the `Executor` seam the
//! promise combinators submit continuations through.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::lock;

/// Unit of work submitted to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run jobs
///
/// Promises are decoupled from any particular pool: continuations are
/// submitted through this trait.
pub trait Executor: Send + Sync + 'static {
    /// Run `job` at some point, possibly on another thread
    fn execute(&self, job: Job);

    /// Number of jobs this executor can run at once
    fn parallelism(&self) -> usize;
}

/// Shared executor handle
pub type ExecutorRef = Arc<dyn Executor>;

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }

    fn parallelism(&self) -> usize {
        (**self).parallelism()
    }
}

/// Runs every job immediately on the submitting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Shared handle to the inline executor
    pub fn shared() -> ExecutorRef {
        Arc::new(InlineExecutor)
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn parallelism(&self) -> usize {
        1
    }
}

/// Worker queue
struct WorkerQueue {
    /// Task queue
    tasks: Mutex<VecDeque<Job>>,
    /// Condition variable for waiting
    condvar: Condvar,
    /// Shutdown flag
    shutdown: AtomicBool,
}

impl WorkerQueue {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn push(&self, job: Job) -> Result<(), Job> {
        let mut queue = lock(&self.tasks);
        if self.shutdown.load(Ordering::Acquire) {
            return Err(job);
        }
        queue.push_back(job);
        self.condvar.notify_one();
        Ok(())
    }

    fn wait_for_task(&self) -> Option<Job> {
        let mut queue = lock(&self.tasks);

        loop {
            // Drain queued work before honouring shutdown
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }

            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }

            // Wait with timeout to check shutdown
            queue = match self.condvar.wait_timeout(queue, Duration::from_millis(100)) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn shutdown(&self) {
        let _queue = lock(&self.tasks);
        self.shutdown.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn len(&self) -> usize {
        lock(&self.tasks).len()
    }
}

/// Cloneable submission handle onto a `ThreadPool`
#[derive(Clone)]
pub struct PoolExecutor {
    queue: Arc<WorkerQueue>,
    worker_count: usize,
}

impl std::fmt::Debug for PoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolExecutor")
            .field("worker_count", &self.worker_count)
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Executor for PoolExecutor {
    fn execute(&self, job: Job) {
        if let Err(job) = self.queue.push(job) {
            // Pool already shut down: run inline so promises still complete
            tracing::warn!("Job submitted after pool shutdown; running inline");
            job();
        }
    }

    fn parallelism(&self) -> usize {
        self.worker_count
    }
}

/// Fixed-size thread pool
pub struct ThreadPool {
    /// Worker threads
    workers: Vec<Worker>,
    /// Shared work queue
    queue: Arc<WorkerQueue>,
    /// Number of workers
    worker_count: usize,
    /// Active task count
    active_tasks: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers)
            .field("worker_count", &self.worker_count)
            .field("active_tasks", &self.active_tasks.load(Ordering::Relaxed))
            .finish()
    }
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl Worker {
    fn spawn(
        id: usize,
        config: &RuntimeConfig,
        queue: Arc<WorkerQueue>,
        active_tasks: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let thread = config.thread_builder(id).spawn(move || {
            while let Some(job) = queue.wait_for_task() {
                active_tasks.fetch_add(1, Ordering::SeqCst);
                // A panicking job must not take the worker down with it
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!("Worker {} recovered from a panicking job", id);
                }
                active_tasks.fetch_sub(1, Ordering::SeqCst);
            }
        })?;

        Ok(Self {
            id,
            thread: Some(thread),
        })
    }
}

impl ThreadPool {
    /// Create new thread pool with specified worker count
    pub fn new(worker_count: usize) -> std::io::Result<Self> {
        Self::with_config(&RuntimeConfig::with_workers(worker_count))
    }

    /// Create with default worker count (num CPUs)
    pub fn default_size() -> std::io::Result<Self> {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Create from a runtime configuration
    pub fn with_config(config: &RuntimeConfig) -> std::io::Result<Self> {
        let worker_count = config.workers.max(1);
        let queue = Arc::new(WorkerQueue::new());
        let active_tasks = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            match Worker::spawn(id, config, Arc::clone(&queue), Arc::clone(&active_tasks)) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    let mut partial = Self {
                        workers,
                        queue,
                        worker_count,
                        active_tasks,
                    };
                    partial.shutdown();
                    return Err(err);
                }
            }
        }

        tracing::debug!("Thread pool started with {} workers", worker_count);

        Ok(Self {
            workers,
            queue,
            worker_count,
            active_tasks,
        })
    }

    /// Submit a task
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.executor().execute(Box::new(task));
    }

    /// Cloneable handle that submits to this pool
    pub fn executor(&self) -> PoolExecutor {
        PoolExecutor {
            queue: Arc::clone(&self.queue),
            worker_count: self.worker_count,
        }
    }

    /// Shared executor handle for promise combinators
    pub fn executor_ref(&self) -> ExecutorRef {
        Arc::new(self.executor())
    }

    /// Get worker count
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Get pending task count
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Get active task count
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Check if pool is idle
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.active_tasks() == 0
    }

    /// Shutdown the pool; queued jobs are drained before workers exit
    pub fn shutdown(&mut self) {
        self.queue.shutdown();

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        self.executor().execute(job);
    }

    fn parallelism(&self) -> usize {
        self.worker_count
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
