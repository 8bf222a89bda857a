#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Tracker parameters.
pub mod config;

pub mod device;

/// Error types for the tracking module.
pub mod error;

pub mod extract;

pub mod kernels;

/// Execution strategies for the kernels.
pub mod parallel;

pub mod target;

pub mod tracker;

pub mod transform;

pub use crate::config::TrackerConfig;
pub use crate::device::{Device, DeviceBuffer, DeviceError};
pub use crate::error::TrackerError;
pub use crate::parallel::ExecutionStrategy;
pub use crate::target::{FeaturePoint, KeyframeData, TargetDataset, TargetError};
pub use crate::tracker::{DebugExtra, TrackResult, Tracker};
pub use crate::transform::Matrix34;
