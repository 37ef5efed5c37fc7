//! Map / Filter / Reduce
//!
//! Fork-join patterns built on `ParallelLoop`.

use std::sync::Mutex;

use strand_runtime::{TaskError, TaskResult, fork_join, lock};

use crate::fork_join::{ParallelLoop, split_by_partitions};

/// Cross-partition ordering of filter results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOrder {
    /// Partitions append as they finish; only within-partition order holds
    #[default]
    Completion,
    /// Partitions are concatenated by start index; input order holds
    Input,
}

impl ParallelLoop {
    /// `outputs[i] == transform(&inputs[i])` for every i
    pub fn map<T, U, F>(&self, inputs: &[T], transform: F) -> TaskResult<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync,
    {
        let mut slots: Vec<Option<U>> = (0..inputs.len()).map(|_| None).collect();
        self.map_into(inputs, &mut slots, |item| Some(transform(item)))?;
        Ok(slots.into_iter().flatten().collect())
    }

    /// Map into a caller-supplied output of the same length.
    ///
    /// Every worker builds its partition's results in a private buffer and
    /// then moves them into its own slice of `outputs`. The slices come from
    /// `split_by_partitions`, so the copy step needs no lock.
    pub fn map_into<T, U, F>(&self, inputs: &[T], outputs: &mut [U], transform: F) -> TaskResult<()>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync,
    {
        if inputs.len() != outputs.len() {
            return Err(TaskError::InvalidArgument(format!(
                "map output length {} does not match input length {}",
                outputs.len(),
                inputs.len()
            )));
        }

        let parts = self.partitions(inputs.len());
        tracing::debug!("Map over {} items in {} partitions", inputs.len(), parts.len());
        let destinations = split_by_partitions(outputs, &parts)?;

        let transform = &transform;
        let tasks: Vec<_> = parts
            .into_iter()
            .zip(destinations)
            .map(|(part, destination)| {
                move || -> TaskResult<()> {
                    let local: Vec<U> = inputs[part.range()].iter().map(transform).collect();
                    for (slot, value) in destination.iter_mut().zip(local) {
                        *slot = value;
                    }
                    Ok(())
                }
            })
            .collect();

        fork_join(tasks).map(|_| ())
    }

    /// Items satisfying `predicate`, appended in partition completion order.
    ///
    /// Relative order inside one partition matches the input; order across
    /// partitions depends on which worker finishes first.
    pub fn filter<T, P>(&self, inputs: &[T], predicate: P) -> TaskResult<Vec<T>>
    where
        T: Clone + Send + Sync,
        P: Fn(&T) -> bool + Sync,
    {
        self.filter_with(inputs, FilterOrder::Completion, predicate)
    }

    /// Items satisfying `predicate`, in input order
    pub fn filter_ordered<T, P>(&self, inputs: &[T], predicate: P) -> TaskResult<Vec<T>>
    where
        T: Clone + Send + Sync,
        P: Fn(&T) -> bool + Sync,
    {
        self.filter_with(inputs, FilterOrder::Input, predicate)
    }

    pub fn filter_with<T, P>(&self, inputs: &[T], order: FilterOrder, predicate: P) -> TaskResult<Vec<T>>
    where
        T: Clone + Send + Sync,
        P: Fn(&T) -> bool + Sync,
    {
        let finished: Mutex<Vec<(usize, Vec<T>)>> = Mutex::new(Vec::new());

        self.for_each_with_local(
            0..inputs.len(),
            Vec::new,
            |i, local| {
                if predicate(&inputs[i]) {
                    local.push(inputs[i].clone());
                }
                Ok(())
            },
            |part, local| {
                lock(&finished).push((part.start, local));
                Ok(())
            },
        )?;

        let mut finished = match finished.into_inner() {
            Ok(finished) => finished,
            Err(poisoned) => poisoned.into_inner(),
        };
        if order == FilterOrder::Input {
            finished.sort_by_key(|(start, _)| *start);
        }

        let matches: Vec<T> = finished.into_iter().flat_map(|(_, local)| local).collect();
        tracing::debug!("Filter kept {} of {} items", matches.len(), inputs.len());
        Ok(matches)
    }

    /// Fold `inputs` with an associative, commutative `combine`.
    ///
    /// `seed` must be an identity of `combine`: it starts every partition's
    /// local accumulator and the shared total, so it is combined in once per
    /// partition plus once more.
    pub fn reduce<T, F>(&self, inputs: &[T], seed: T, combine: F) -> TaskResult<T>
    where
        T: Clone + Send + Sync,
        F: Fn(T, T) -> T + Sync,
    {
        let total = Mutex::new(Some(seed.clone()));
        let (seed, combine) = (&seed, &combine);

        self.for_each_partition(inputs.len(), |part| {
            let local = inputs[part.range()]
                .iter()
                .cloned()
                .fold(seed.clone(), combine);

            let mut total = lock(&total);
            let merged = match total.take() {
                Some(current) => combine(current, local),
                None => local,
            };
            *total = Some(merged);
            Ok(())
        })?;

        let total = match total.into_inner() {
            Ok(total) => total,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(total.unwrap_or_else(|| seed.clone()))
    }
}

/// `map` on a default-sized loop
pub fn map<T, U, F>(inputs: &[T], transform: F) -> TaskResult<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    ParallelLoop::default().map(inputs, transform)
}

/// `filter` on a default-sized loop
pub fn filter<T, P>(inputs: &[T], predicate: P) -> TaskResult<Vec<T>>
where
    T: Clone + Send + Sync,
    P: Fn(&T) -> bool + Sync,
{
    ParallelLoop::default().filter(inputs, predicate)
}

/// `reduce` on a default-sized loop
pub fn reduce<T, F>(inputs: &[T], seed: T, combine: F) -> TaskResult<T>
where
    T: Clone + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    ParallelLoop::default().reduce(inputs, seed, combine)
}
