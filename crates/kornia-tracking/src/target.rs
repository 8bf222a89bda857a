//! Immutable per-target reference data.
//!
//! The [`TargetStore`] uploads the template of every target and a padded
//! batch of feature points once, at construction. Nothing in here is mutated
//! afterwards; the per-frame kernels only borrow it.

use kornia_image::ImageSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{Device, DeviceBuffer, DeviceError};

/// Coordinate stored in padding slots of the feature batch.
pub const PADDING_POINT: [f32; 2] = [-1.0, -1.0];

/// Error types for malformed reference data.
#[derive(Debug, Error, PartialEq)]
pub enum TargetError {
    /// No target datasets were supplied.
    #[error("at least one target dataset is required")]
    NoTargets,

    /// The tracking keyframe is missing from a dataset.
    #[error("target {target} has {available} keyframes, keyframe {keyframe} requested")]
    MissingKeyframe {
        /// Index of the offending target.
        target: usize,
        /// Requested keyframe index.
        keyframe: usize,
        /// Number of keyframes in the dataset.
        available: usize,
    },

    /// The tracking keyframe has no feature points.
    #[error("target {target} has no feature points")]
    EmptyFeaturePoints {
        /// Index of the offending target.
        target: usize,
    },

    /// The keyframe has a zero width or height.
    #[error("target {target} has an empty keyframe ({width}x{height})")]
    InvalidDimensions {
        /// Index of the offending target.
        target: usize,
        /// Keyframe width.
        width: usize,
        /// Keyframe height.
        height: usize,
    },

    /// The pixel buffer does not cover the keyframe.
    #[error("target {target} pixel buffer has {actual} values, expected {expected}")]
    PixelBufferSize {
        /// Index of the offending target.
        target: usize,
        /// `width * height`.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },

    /// The keyframe scale is not a finite positive number.
    #[error("target {target} has an invalid scale {scale}")]
    InvalidScale {
        /// Index of the offending target.
        target: usize,
        /// The supplied scale.
        scale: f32,
    },

    /// The reference data could not be uploaded.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A feature location in keyframe pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeaturePoint {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl FeaturePoint {
    /// Create a feature point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One keyframe record of a reference dataset, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeData {
    /// Precomputed feature points.
    pub points: Vec<FeaturePoint>,
    /// Grayscale pixels, row-major, `width * height` values.
    pub pixels: Vec<u8>,
    /// Keyframe width in pixels.
    pub width: usize,
    /// Keyframe height in pixels.
    pub height: usize,
    /// Keyframe pixels per reference-world unit.
    pub scale: f32,
}

/// The reference data of one target: one keyframe per resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDataset {
    /// Keyframes, usually from the finest to the coarsest resolution.
    pub keyframes: Vec<KeyframeData>,
}

/// The keyframe a target is tracked against, resident on the device.
#[derive(Debug)]
pub struct TargetKeyframe {
    points: Vec<FeaturePoint>,
    template: DeviceBuffer<u8>,
    size: ImageSize,
    scale: f32,
}

impl TargetKeyframe {
    /// The feature points of the target.
    pub fn points(&self) -> &[FeaturePoint] {
        &self.points
    }

    /// The template pixels, row-major.
    pub fn template(&self) -> &[u8] {
        self.template.as_slice()
    }

    /// Size of the template image.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Pixels per reference-world unit.
    pub fn scale(&self) -> f32 {
        self.scale
    }
}

/// Feature points of all targets padded to a common slot count.
///
/// Slot `i` of target `t` lives at `t * capacity + i`. Slots at or after the
/// target's `valid_len` hold [`PADDING_POINT`].
#[derive(Debug)]
pub struct PaddedFeatureBatch {
    capacity: usize,
    valid_len: Vec<usize>,
    points: DeviceBuffer<[f32; 2]>,
}

impl PaddedFeatureBatch {
    /// Pad the point lists and upload them as one buffer.
    pub fn new(device: &Device, point_sets: &[&[FeaturePoint]]) -> Result<Self, DeviceError> {
        let capacity = point_sets.iter().map(|p| p.len()).max().unwrap_or(0);

        let mut data = Vec::with_capacity(capacity * point_sets.len());
        for points in point_sets {
            data.extend(points.iter().map(|p| [p.x, p.y]));
            data.extend(std::iter::repeat(PADDING_POINT).take(capacity - points.len()));
        }

        Ok(Self {
            capacity,
            valid_len: point_sets.iter().map(|p| p.len()).collect(),
            points: device.from_vec(data)?,
        })
    }

    /// Number of slots per target, i.e. the largest real point count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of real points of `target`.
    pub fn valid_len(&self, target: usize) -> usize {
        self.valid_len[target]
    }

    /// All `capacity` slots of `target`, padding included.
    pub fn slots(&self, target: usize) -> &[[f32; 2]] {
        let start = target * self.capacity;
        &self.points.as_slice()[start..start + self.capacity]
    }
}

/// The reference data of every target.
#[derive(Debug)]
pub struct TargetStore {
    keyframes: Vec<TargetKeyframe>,
    batch: PaddedFeatureBatch,
}

impl TargetStore {
    /// Validate the datasets and upload the chosen keyframe of each.
    ///
    /// # Arguments
    ///
    /// * `device` - The device holding the persistent buffers.
    /// * `datasets` - One dataset per target.
    /// * `keyframe` - Index of the keyframe used for tracking in every dataset.
    pub fn new(
        device: &Device,
        datasets: &[TargetDataset],
        keyframe: usize,
    ) -> Result<Self, TargetError> {
        if datasets.is_empty() {
            return Err(TargetError::NoTargets);
        }

        let mut keyframes = Vec::with_capacity(datasets.len());
        for (target, dataset) in datasets.iter().enumerate() {
            let data = dataset
                .keyframes
                .get(keyframe)
                .ok_or(TargetError::MissingKeyframe {
                    target,
                    keyframe,
                    available: dataset.keyframes.len(),
                })?;
            validate_keyframe(target, data)?;

            keyframes.push(TargetKeyframe {
                points: data.points.clone(),
                template: device.upload(&data.pixels)?,
                size: ImageSize {
                    width: data.width,
                    height: data.height,
                },
                scale: data.scale,
            });
        }

        let point_sets = keyframes.iter().map(|k| k.points()).collect::<Vec<_>>();
        let batch = PaddedFeatureBatch::new(device, &point_sets)?;

        Ok(Self { keyframes, batch })
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    /// Whether the store holds no target. Always false for a constructed store.
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// The tracking keyframe of `target`.
    pub fn keyframe(&self, target: usize) -> Option<&TargetKeyframe> {
        self.keyframes.get(target)
    }

    /// The padded feature batch shared by all targets.
    pub fn batch(&self) -> &PaddedFeatureBatch {
        &self.batch
    }
}

fn validate_keyframe(target: usize, data: &KeyframeData) -> Result<(), TargetError> {
    if data.points.is_empty() {
        return Err(TargetError::EmptyFeaturePoints { target });
    }
    if data.width == 0 || data.height == 0 {
        return Err(TargetError::InvalidDimensions {
            target,
            width: data.width,
            height: data.height,
        });
    }
    if data.pixels.len() != data.width * data.height {
        return Err(TargetError::PixelBufferSize {
            target,
            expected: data.width * data.height,
            actual: data.pixels.len(),
        });
    }
    if !data.scale.is_finite() || data.scale <= 0.0 {
        return Err(TargetError::InvalidScale {
            target,
            scale: data.scale,
        });
    }
    Ok(())
}
