use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::kernels::matching::MatchingParams;
use crate::parallel::ExecutionStrategy;

/// Largest accepted `template_half_size`.
pub const MAX_TEMPLATE_HALF_SIZE: usize = 64;

/// Largest accepted `search_grid_half_count`.
pub const MAX_SEARCH_GRID_HALF_COUNT: usize = 128;

/// Largest accepted `search_gap`.
pub const MAX_SEARCH_GAP: usize = 1024;

/// Tunable parameters of the tracker.
///
/// Every field has a default, so a JSON document only needs to list the
/// values it overrides:
///
/// ```
/// use kornia_tracking::TrackerConfig;
///
/// let config = TrackerConfig::from_json_str(r#"{ "search_gap": 2, "debug": true }"#).unwrap();
///
/// assert_eq!(config.search_gap, 2);
/// assert_eq!(config.template_half_size, 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Half size of the dense template window, in keyframe pixels.
    pub template_half_size: usize,
    /// Stride inside the template window. The window is always sampled densely.
    pub template_gap: usize,
    /// Number of search candidates on each side of the predicted location.
    pub search_grid_half_count: usize,
    /// Distance between two adjacent search candidates, in keyframe pixels.
    pub search_gap: usize,
    /// Minimum similarity a match must exceed to become a correspondence.
    pub similarity_threshold: f32,
    /// Divisor applied to the transform before it reaches the kernels.
    pub precision_adjust: f32,
    /// Index of the keyframe of every dataset used as tracking template.
    pub tracking_keyframe: usize,
    /// Expose intermediate buffers in [`crate::TrackResult::debug`].
    pub debug: bool,
    /// How the kernels spread their work.
    pub execution: ExecutionStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            template_half_size: 6,
            template_gap: 1,
            search_grid_half_count: 10,
            search_gap: 1,
            similarity_threshold: 0.8,
            precision_adjust: 1000.0,
            tracking_keyframe: 0,
            debug: false,
            execution: ExecutionStrategy::ParallelElements,
        }
    }
}

impl TrackerConfig {
    /// Parse a configuration from JSON, falling back to defaults for missing keys.
    pub fn from_json_str(json: &str) -> Result<Self, TrackerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters describe a usable kernel configuration.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.template_half_size == 0 {
            return Err(TrackerError::InvalidConfig(
                "template_half_size must be > 0".to_string(),
            ));
        }
        if self.template_half_size > MAX_TEMPLATE_HALF_SIZE {
            return Err(TrackerError::InvalidConfig(format!(
                "template_half_size must be <= {MAX_TEMPLATE_HALF_SIZE}, got {}",
                self.template_half_size
            )));
        }
        if self.search_grid_half_count > MAX_SEARCH_GRID_HALF_COUNT {
            return Err(TrackerError::InvalidConfig(format!(
                "search_grid_half_count must be <= {MAX_SEARCH_GRID_HALF_COUNT}, got {}",
                self.search_grid_half_count
            )));
        }
        if self.template_gap == 0 {
            return Err(TrackerError::InvalidConfig(
                "template_gap must be > 0".to_string(),
            ));
        }
        if self.search_gap == 0 {
            return Err(TrackerError::InvalidConfig(
                "search_gap must be > 0".to_string(),
            ));
        }
        if self.search_gap > MAX_SEARCH_GAP {
            return Err(TrackerError::InvalidConfig(format!(
                "search_gap must be <= {MAX_SEARCH_GAP}, got {}",
                self.search_gap
            )));
        }
        // sentinels are <= -2, so anything at or above the NCC floor rejects them
        if !self.similarity_threshold.is_finite() || self.similarity_threshold < -1.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "similarity_threshold must be finite and >= -1, got {}",
                self.similarity_threshold
            )));
        }
        if !self.precision_adjust.is_finite() || self.precision_adjust <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "precision_adjust must be finite and > 0, got {}",
                self.precision_adjust
            )));
        }
        if let ExecutionStrategy::Fixed(0) = self.execution {
            return Err(TrackerError::InvalidConfig(
                "execution thread count must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The structural parameters of the matching kernel.
    pub fn matching_params(&self) -> MatchingParams {
        MatchingParams {
            template_half_size: self.template_half_size,
            template_gap: self.template_gap,
            search_grid_half_count: self.search_grid_half_count,
            search_gap: self.search_gap,
        }
    }
}
