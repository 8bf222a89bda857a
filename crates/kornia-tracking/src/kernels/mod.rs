//! Data-parallel kernels of the tracking pipeline and the cache holding them.

/// Compiled kernel storage keyed by structural parameters.
pub mod cache;

/// Windowed normalized cross correlation search.
pub mod matching;

/// Rectification of camera frames into keyframe space.
pub mod projection;

pub use cache::KernelCache;
pub use matching::{MatchingKernel, MatchingKey, MatchingParams};
pub use projection::{ProjectionKernel, ProjectionKey};
