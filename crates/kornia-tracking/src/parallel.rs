use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during parallel execution.
#[derive(Error, Debug, PartialEq)]
pub enum ParallelError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),

    /// The chunk size of a dispatch must be valid.
    #[error("chunk size must be > 0")]
    InvalidChunkSize,
}

/// Controls how a kernel dispatch spreads its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool, one task per chunk.
    #[default]
    ParallelElements,

    /// Run sequentially on the current thread.
    ///
    /// Useful for small targets, debugging, or when the overhead of
    /// parallelization outweighs the benefits.
    Serial,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every dispatch, which has significant overhead.
    /// Use this primarily for benchmarking or specific isolation needs.
    Fixed(usize),
}

/// Run `op` over every `chunk_size` chunk of `dst` with the given strategy.
///
/// The closure receives the chunk index and the mutable chunk. Every chunk is
/// written by exactly one invocation, so the output is the same regardless of
/// the strategy.
///
/// # Arguments
///
/// * `strategy` - The execution strategy.
/// * `dst` - The destination slice.
/// * `chunk_size` - Number of elements per work item.
/// * `op` - The operation to perform on each chunk.
pub fn dispatch_chunks<T, F>(
    strategy: ExecutionStrategy,
    dst: &mut [T],
    chunk_size: usize,
    op: F,
) -> Result<(), ParallelError>
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    if chunk_size == 0 {
        return Err(ParallelError::InvalidChunkSize);
    }

    match strategy {
        ExecutionStrategy::Serial => {
            dst.chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| op(i, chunk));
        }
        ExecutionStrategy::ParallelElements => {
            dst.par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| op(i, chunk));
        }
        ExecutionStrategy::Fixed(n) => {
            if n == 0 {
                return Err(ParallelError::InvalidThreadCount(n));
            }
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ParallelError::BuildError(e.to_string()))?;

            pool.install(|| {
                dst.par_chunks_mut(chunk_size)
                    .enumerate()
                    .for_each(|(i, chunk)| op(i, chunk));
            });
        }
    }
    Ok(())
}
