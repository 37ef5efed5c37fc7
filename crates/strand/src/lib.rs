//! Strand
//!
//! Parallel algorithmic primitives on top of `strand-runtime`.
//!
//! # Modules
//! - `partition`: disjoint, near-equal index ranges
//! - `fork_join`: partitioned loops with per-worker local state
//! - `patterns`: map, filter and reduce
//! - `scan`: in-place prefix scans (serial, load-balanced, barrier)
//! - `wavefront`: top/left dependency grids over promises
//! - `race`: first-success speculative execution
//! - `fixpoint`: double-buffered work rounds until nothing is emitted
//! - `sort`: bucket sort with a barrier-driven merge tournament
//!
//! Slice-based primitives run their participants through a scoped
//! fork-join and borrow the caller's data. The promise-based ones
//! (wavefront, race, fixpoint) submit `'static` jobs to an `Executor`.

pub mod fixpoint;
pub mod fork_join;
pub mod partition;
pub mod patterns;
pub mod race;
pub mod scan;
pub mod sort;
pub mod wavefront;

pub use fixpoint::{Emitter, Fixpoint, FixpointReport};
pub use fork_join::{ParallelLoop, split_by_partitions};
pub use partition::{Partition, PartitionIndex, partition, partition_big, partition_default};
pub use patterns::{FilterOrder, filter, map, reduce};
pub use race::{race, race_each, race_with_input};
pub use scan::{PrefixScan, ScanStrategy};
pub use sort::{ParallelSorter, parallel_sort};
pub use wavefront::{BlockBounds, Wavefront};

pub use strand_runtime as runtime;
pub use strand_runtime::{AggregateError, CancellationToken, TaskError, TaskResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Keep only the faults that originated in a participant, dropping the
/// `BarrierBroken` and dependency echoes they caused elsewhere
pub(crate) fn root_fault(err: TaskError) -> TaskError {
    let roots = err.root_causes();
    if roots.is_empty() {
        err
    } else {
        AggregateError::new(roots).into()
    }
}
