use kornia_image::{ImageError, ImageSize};
use thiserror::Error;

use crate::device::DeviceError;
use crate::parallel::ParallelError;
use crate::target::TargetError;

/// Error types for the tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker configuration is not usable.
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),

    /// The configuration document could not be parsed.
    #[error("failed to parse tracker configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The number of marker dimensions differs from the number of datasets.
    #[error("got {markers} marker dimensions for {datasets} target datasets")]
    MismatchedTargetCount {
        /// Number of marker dimensions supplied.
        markers: usize,
        /// Number of target datasets supplied.
        datasets: usize,
    },

    /// The reference data of a target is malformed.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The requested target does not exist.
    #[error("target index {index} out of bounds ({num_targets} targets)")]
    TargetIndexOutOfBounds {
        /// Requested target index.
        index: usize,
        /// Number of targets held by the tracker.
        num_targets: usize,
    },

    /// The camera frame does not have the configured input size.
    #[error("camera frame size {actual} does not match the input size {expected}")]
    FrameSizeMismatch {
        /// Input size given at construction.
        expected: ImageSize,
        /// Size of the frame passed to `track`.
        actual: ImageSize,
    },

    /// The model-view-projection is not finite once divided by the precision adjust.
    #[error("model-view-projection is not finite with precision_adjust {precision_adjust}")]
    NonFiniteTransform {
        /// The configured precision adjust.
        precision_adjust: f32,
    },

    /// A kernel buffer could not be allocated.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A kernel dispatch failed to schedule its work.
    #[error(transparent)]
    Parallel(#[from] ParallelError),

    /// An image could not be built from a kernel buffer.
    #[error(transparent)]
    Image(#[from] ImageError),
}
