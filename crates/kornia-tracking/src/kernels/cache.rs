use std::collections::HashMap;
use std::sync::Arc;

use super::matching::{MatchingKernel, MatchingKey};
use super::projection::{ProjectionKernel, ProjectionKey};

/// Compiled kernels, keyed by the parameters they were compiled for.
///
/// Every distinct key is compiled exactly once; later lookups hand out the
/// same shared kernel.
#[derive(Debug, Default)]
pub struct KernelCache {
    projection: HashMap<ProjectionKey, Arc<ProjectionKernel>>,
    matching: HashMap<MatchingKey, Arc<MatchingKernel>>,
}

impl KernelCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The projection kernel for `key`, compiling it on first use.
    pub fn projection_kernel(&mut self, key: ProjectionKey) -> Arc<ProjectionKernel> {
        self.projection
            .entry(key)
            .or_insert_with(|| {
                log::debug!(
                    "compiling projection kernel for {}x{} at scale {}",
                    key.width,
                    key.height,
                    key.scale()
                );
                Arc::new(ProjectionKernel::compile(key))
            })
            .clone()
    }

    /// The matching kernel for `key`, compiling it on first use.
    pub fn matching_kernel(&mut self, key: MatchingKey) -> Arc<MatchingKernel> {
        self.matching
            .entry(key)
            .or_insert_with(|| {
                log::debug!(
                    "compiling matching kernel for {} slots, {} candidates",
                    key.max_count,
                    key.params.num_candidates()
                );
                Arc::new(MatchingKernel::compile(key))
            })
            .clone()
    }

    /// Number of compiled projection kernels.
    pub fn num_projection_kernels(&self) -> usize {
        self.projection.len()
    }

    /// Number of compiled matching kernels.
    pub fn num_matching_kernels(&self) -> usize {
        self.matching.len()
    }

    /// Total number of compiled kernels.
    pub fn num_compiled(&self) -> usize {
        self.projection.len() + self.matching.len()
    }
}
