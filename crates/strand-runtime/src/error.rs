//! Task Errors
//!
//! Fault taxonomy shared by every primitive:
//! - per-worker faults raised inside a user delegate
//! - aggregate faults observed at a join point
//! - cooperative cancellation

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of a unit of work
pub type TaskResult<T> = Result<T, TaskError>;

/// Fault produced by a unit of work or observed at a join point
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// A user delegate panicked
    #[error("task panicked: {0}")]
    Panicked(Arc<str>),

    /// A user delegate returned an error
    #[error("task failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// The unit observed a cancellation request before running
    #[error("task cancelled")]
    Cancelled,

    /// A predecessor faulted, so this unit never ran
    #[error("dependency faulted: {0}")]
    Dependency(Arc<TaskError>),

    /// A race was started without candidates
    #[error("no candidates to race")]
    NoCandidates,

    /// Arguments rejected before any work was scheduled
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another participant faulted and broke the barrier
    #[error("barrier broken by a faulted participant")]
    BarrierBroken,

    /// One or more faults collected at a join point
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl TaskError {
    /// Wrap an arbitrary error raised by a delegate
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// Fault with a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(Message(message.into())))
    }

    /// Convert a panic payload captured by `catch_unwind`
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message.into())
    }

    /// Whether this fault is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this fault was only propagated from a predecessor
    pub fn is_dependency(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }

    /// Flatten aggregates and drop propagated dependency faults,
    /// leaving the faults that actually originated somewhere.
    pub fn root_causes(&self) -> Vec<TaskError> {
        let mut roots = Vec::new();
        self.collect_roots(&mut roots);
        roots
    }

    fn collect_roots(&self, out: &mut Vec<TaskError>) {
        match self {
            Self::Aggregate(agg) => {
                for cause in agg.causes() {
                    cause.collect_roots(out);
                }
            }
            Self::Dependency(_) | Self::BarrierBroken => {}
            other => out.push(other.clone()),
        }
    }
}

/// Composite of every fault observed at one join point
#[derive(Debug, Clone)]
pub struct AggregateError {
    causes: Vec<TaskError>,
}

impl AggregateError {
    /// Build from causes; nested aggregates are flattened
    pub fn new(causes: impl IntoIterator<Item = TaskError>) -> Self {
        let mut flat = Vec::new();
        for cause in causes {
            match cause {
                TaskError::Aggregate(inner) => flat.extend(inner.causes),
                other => flat.push(other),
            }
        }
        Self { causes: flat }
    }

    /// Underlying causes in the order they were observed
    pub fn causes(&self) -> &[TaskError] {
        &self.causes
    }

    /// Consume into the underlying causes
    pub fn into_causes(self) -> Vec<TaskError> {
        self.causes
    }

    /// Number of causes
    pub fn len(&self) -> usize {
        self.causes.len()
    }

    /// True when no cause was recorded
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.causes.first() {
            Some(first) if self.causes.len() == 1 => write!(f, "1 task faulted: {}", first),
            Some(first) => write!(f, "{} tasks faulted; first: {}", self.causes.len(), first),
            None => write!(f, "aggregate fault with no causes"),
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.causes
            .first()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Run a delegate, turning a panic into `TaskError::Panicked`
pub fn catch_task<T, F>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> TaskResult<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}

/// Collapse per-branch outcomes into values or one aggregate fault
pub fn join_outcomes<T>(outcomes: Vec<TaskResult<T>>) -> TaskResult<Vec<T>> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut faults = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(err) => faults.push(err),
        }
    }
    if faults.is_empty() {
        Ok(values)
    } else {
        Err(AggregateError::new(faults).into())
    }
}
