//! The per-frame correspondence engine.

use kornia_image::{Image, ImageSize};

use crate::config::TrackerConfig;
use crate::device::Device;
use crate::error::TrackerError;
use crate::extract::{extract_correspondences, select_best_matches};
use crate::kernels::{KernelCache, MatchingKey, ProjectionKey};
use crate::target::{TargetDataset, TargetStore};
use crate::transform::{build_model_view_projection, AdjustedTransform, Matrix34};

/// Pose used by [`Tracker::dummy_run`]: identity rotation, one unit in front of the camera.
#[rustfmt::skip]
pub const DUMMY_POSE: Matrix34 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 1.0],
];

/// Intermediate values of a tracked frame, filled in debug mode.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugExtra {
    /// The rectified camera frame. Pixels outside the frame are zero.
    pub projected_image: Image<u8, 1>,
    /// Refined location of every feature before thresholding, in reference-world units.
    pub matching_points: Vec<[f32; 2]>,
    /// Best similarity of every feature before thresholding.
    pub similarities: Vec<f32>,
    /// Indices of the accepted features.
    pub good_track: Vec<usize>,
    /// Camera pixel coordinates of the accepted features.
    pub tracked_points: Vec<[f32; 2]>,
}

/// The correspondences found in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    /// Reference-world coordinates of the accepted features.
    pub world_coords: Vec<[f32; 3]>,
    /// Camera pixel coordinates, index aligned with `world_coords`.
    pub screen_coords: Vec<[f32; 2]>,
    /// Present when the tracker runs in debug mode.
    pub debug: Option<DebugExtra>,
}

impl TrackResult {
    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.world_coords.len()
    }

    /// Whether the frame produced no correspondence.
    pub fn is_empty(&self) -> bool {
        self.world_coords.is_empty()
    }
}

/// Tracks planar targets in a camera stream.
///
/// The reference data of every target is uploaded once. Each call to
/// [`Tracker::track`] rectifies the frame with a prior pose, searches every
/// feature with normalized cross correlation and returns the 2D/3D
/// correspondences a pose solver needs.
pub struct Tracker {
    config: TrackerConfig,
    device: Device,
    store: TargetStore,
    marker_dimensions: Vec<ImageSize>,
    projection: Matrix34,
    input_size: ImageSize,
    cache: KernelCache,
}

impl Tracker {
    /// Create a tracker on a fresh [`Device`].
    ///
    /// # Arguments
    ///
    /// * `marker_dimensions` - Physical size of every target, one per dataset.
    /// * `datasets` - Reference data of every target.
    /// * `projection` - The 3x4 camera projection matrix.
    /// * `input_size` - Size of the camera frames passed to [`Tracker::track`].
    /// * `config` - Tracker parameters.
    pub fn new(
        marker_dimensions: Vec<ImageSize>,
        datasets: &[TargetDataset],
        projection: Matrix34,
        input_size: ImageSize,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        Self::with_device(
            Device::new(),
            marker_dimensions,
            datasets,
            projection,
            input_size,
            config,
        )
    }

    /// Create a tracker whose buffers live on `device`.
    pub fn with_device(
        device: Device,
        marker_dimensions: Vec<ImageSize>,
        datasets: &[TargetDataset],
        projection: Matrix34,
        input_size: ImageSize,
        config: TrackerConfig,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        if marker_dimensions.len() != datasets.len() {
            return Err(TrackerError::MismatchedTargetCount {
                markers: marker_dimensions.len(),
                datasets: datasets.len(),
            });
        }

        let store = TargetStore::new(&device, datasets, config.tracking_keyframe)?;

        log::info!(
            "tracker ready: {} targets, {} feature slots, {} bytes resident",
            store.len(),
            store.batch().capacity(),
            device.allocated_bytes()
        );

        Ok(Self {
            config,
            device,
            store,
            marker_dimensions,
            projection,
            input_size,
            cache: KernelCache::new(),
        })
    }

    /// Find the correspondences of one target in a camera frame.
    ///
    /// # Arguments
    ///
    /// * `frame` - The grayscale camera frame, of the configured input size.
    /// * `model_view` - Prior pose of the target, usually the previous refined pose.
    /// * `target_index` - The target to track.
    ///
    /// # Returns
    ///
    /// The accepted correspondences. A frame without any is not an error.
    pub fn track(
        &mut self,
        frame: &Image<u8, 1>,
        model_view: &Matrix34,
        target_index: usize,
    ) -> Result<TrackResult, TrackerError> {
        if frame.size() != self.input_size {
            return Err(TrackerError::FrameSizeMismatch {
                expected: self.input_size,
                actual: frame.size(),
            });
        }

        let keyframe =
            self.store
                .keyframe(target_index)
                .ok_or(TrackerError::TargetIndexOutOfBounds {
                    index: target_index,
                    num_targets: self.store.len(),
                })?;
        let batch = self.store.batch();
        let strategy = self.config.execution;

        let mvp = build_model_view_projection(&self.projection, model_view);
        let transform = AdjustedTransform::new(&mvp, self.config.precision_adjust)?;

        let projection_kernel = self
            .cache
            .projection_kernel(ProjectionKey::new(keyframe.size(), keyframe.scale()));
        let matching_kernel = self.cache.matching_kernel(MatchingKey {
            max_count: batch.capacity(),
            params: self.config.matching_params(),
        });

        let rectified = projection_kernel.dispatch(&self.device, frame, &transform, strategy)?;
        let scores = matching_kernel.dispatch(
            &self.device,
            rectified.as_slice(),
            keyframe.template(),
            keyframe.size(),
            batch.slots(target_index),
            strategy,
        )?;

        let matches = select_best_matches(scores.as_slice(), matching_kernel.search_offsets());
        drop(scores);

        let projected_image = if self.config.debug {
            let pixels = rectified
                .as_slice()
                .iter()
                .map(|&v| v.max(0.0) as u8)
                .collect();
            Some(Image::new(keyframe.size(), pixels)?)
        } else {
            None
        };
        drop(rectified);

        let found = extract_correspondences(
            keyframe.points(),
            &matches,
            keyframe.scale(),
            &mvp,
            self.config.similarity_threshold,
        );

        log::debug!(
            "target {}: {} of {} features tracked",
            target_index,
            found.len(),
            batch.valid_len(target_index)
        );

        let debug = projected_image.map(|projected_image| DebugExtra {
            projected_image,
            matching_points: found.candidates,
            similarities: found.similarities,
            good_track: found.good_track,
            tracked_points: found.screen_coords.clone(),
        });

        Ok(TrackResult {
            world_coords: found.world_coords,
            screen_coords: found.screen_coords,
            debug,
        })
    }

    /// Track every target once with [`DUMMY_POSE`] and discard the results.
    ///
    /// Compiles every kernel ahead of real-time use.
    pub fn dummy_run(&mut self, frame: &Image<u8, 1>) -> Result<(), TrackerError> {
        for target in 0..self.num_targets() {
            self.track(frame, &DUMMY_POSE, target)?;
        }
        log::debug!("warm-up compiled {} kernels", self.cache.num_compiled());
        Ok(())
    }

    /// Number of targets.
    pub fn num_targets(&self) -> usize {
        self.store.len()
    }

    /// Feature slots per target, the largest point count over all targets.
    pub fn max_count(&self) -> usize {
        self.store.batch().capacity()
    }

    /// Physical size of every target, as given at construction.
    pub fn marker_dimensions(&self) -> &[ImageSize] {
        &self.marker_dimensions
    }

    /// Size of the camera frames accepted by [`Tracker::track`].
    pub fn input_size(&self) -> ImageSize {
        self.input_size
    }

    /// The tracker parameters.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The device holding the tracker buffers.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The compiled kernels.
    pub fn kernel_cache(&self) -> &KernelCache {
        &self.cache
    }

    /// The reference data of every target.
    pub fn targets(&self) -> &TargetStore {
        &self.store
    }
}
