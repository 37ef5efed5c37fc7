//! Wavefront Scheduling
//!
//! Runs a 2-D grid where cell `(r, c)` may start only after `(r-1, c)` and
//! `(r, c-1)` completed. Every cell is a promise continuation:
//! - `(0, 0)` is spawned directly
//! - edge cells continue off their single predecessor
//! - interior cells continue off `when_all([above, left])`
//!
//! A faulted predecessor is propagated as `TaskError::Dependency` without
//! running the body. The terminal promise reports only the faults that
//! originated in a body.

use std::sync::Arc;

use strand_runtime::{
    AggregateError, CancellationToken, Executor, ExecutorRef, Promise, TaskError, TaskResult,
    spawn, when_all,
};

/// Inclusive-exclusive bounds of one block of a blocked wavefront
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockBounds {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl BlockBounds {
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.start_row..self.end_row
    }

    pub fn cols(&self) -> std::ops::Range<usize> {
        self.start_col..self.end_col
    }
}

/// Extent of block `index` when `len` is cut into `blocks` pieces; the last
/// block absorbs the remainder
fn block_extent(len: usize, blocks: usize, index: usize) -> (usize, usize) {
    let size = len / blocks;
    let start = index * size;
    let end = if index + 1 == blocks { len } else { start + size };
    (start, end)
}

/// Dependency-grid scheduler
#[derive(Clone)]
pub struct Wavefront {
    executor: ExecutorRef,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for Wavefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wavefront")
            .field("parallelism", &self.executor.parallelism())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Wavefront {
    pub fn new(executor: ExecutorRef) -> Self {
        Self {
            executor,
            cancel: None,
        }
    }

    /// Check `token` before every cell body; cancelled cells fault with
    /// `TaskError::Cancelled`
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Schedule `body(row, col)` for every cell of a `rows x cols` grid
    pub fn spawn_cells<F>(&self, rows: usize, cols: usize, body: F) -> Promise<()>
    where
        F: Fn(usize, usize) -> TaskResult<()> + Send + Sync + 'static,
    {
        if rows == 0 || cols == 0 {
            return Promise::completed(());
        }

        tracing::debug!("Scheduling {}x{} wavefront", rows, cols);
        let body = Arc::new(body);
        let mut grid: Vec<Promise<()>> = Vec::with_capacity(rows * cols);

        for row in 0..rows {
            for col in 0..cols {
                let run = cell_job(Arc::clone(&body), self.cancel.clone(), row, col);
                let cell = match (row, col) {
                    (0, 0) => spawn(&self.executor, run),
                    (0, _) => grid[col - 1].continue_with(&self.executor, move |left| {
                        left.map_err(propagate)?;
                        run()
                    }),
                    (_, 0) => grid[(row - 1) * cols].continue_with(&self.executor, move |above| {
                        above.map_err(propagate)?;
                        run()
                    }),
                    _ => {
                        let above = grid[(row - 1) * cols + col].clone();
                        let left = grid[row * cols + col - 1].clone();
                        when_all(vec![above, left]).continue_with(&self.executor, move |both| {
                            both.map_err(propagate)?;
                            run()
                        })
                    }
                };
                grid.push(cell);
            }
        }

        when_all(grid).continue_with(&self.executor, |outcome| match outcome {
            Ok(_) => Ok(()),
            Err(err) => {
                let roots = err.root_causes();
                tracing::warn!("Wavefront finished with {} faulted cells", roots.len());
                Err(AggregateError::new(roots).into())
            }
        })
    }

    /// Schedule `body(bounds)` for every block of a blocked grid.
    ///
    /// Rows are cut into `blocks_per_row` extents and columns into
    /// `blocks_per_col`; the last extent on each axis absorbs the remainder.
    pub fn spawn_blocks<F>(
        &self,
        rows: usize,
        cols: usize,
        blocks_per_row: usize,
        blocks_per_col: usize,
        body: F,
    ) -> Promise<()>
    where
        F: Fn(BlockBounds) -> TaskResult<()> + Send + Sync + 'static,
    {
        if rows == 0 || cols == 0 {
            return Promise::completed(());
        }
        if !(1..=rows).contains(&blocks_per_row) || !(1..=cols).contains(&blocks_per_col) {
            return Promise::faulted(TaskError::InvalidArgument(format!(
                "{}x{} blocks do not fit a {}x{} grid",
                blocks_per_row, blocks_per_col, rows, cols
            )));
        }

        self.spawn_cells(blocks_per_row, blocks_per_col, move |block_row, block_col| {
            let (start_row, end_row) = block_extent(rows, blocks_per_row, block_row);
            let (start_col, end_col) = block_extent(cols, blocks_per_col, block_col);
            body(BlockBounds {
                start_row,
                end_row,
                start_col,
                end_col,
            })
        })
    }

    /// `spawn_cells` and block until the grid finished
    pub fn run_cells<F>(&self, rows: usize, cols: usize, body: F) -> TaskResult<()>
    where
        F: Fn(usize, usize) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.spawn_cells(rows, cols, body).wait()
    }

    /// `spawn_blocks` and block until the grid finished
    pub fn run_blocks<F>(
        &self,
        rows: usize,
        cols: usize,
        blocks_per_row: usize,
        blocks_per_col: usize,
        body: F,
    ) -> TaskResult<()>
    where
        F: Fn(BlockBounds) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.spawn_blocks(rows, cols, blocks_per_row, blocks_per_col, body)
            .wait()
    }
}

/// Body of one cell, checking the cancellation token first
fn cell_job<F>(
    body: Arc<F>,
    cancel: Option<CancellationToken>,
    row: usize,
    col: usize,
) -> impl FnOnce() -> TaskResult<()> + Send + 'static
where
    F: Fn(usize, usize) -> TaskResult<()> + Send + Sync + 'static,
{
    move || {
        if let Some(token) = &cancel {
            token.check()?;
        }
        body(row, col)
    }
}

fn propagate(err: TaskError) -> TaskError {
    TaskError::Dependency(Arc::new(err))
}
