//! Selection of the best candidate per feature and conversion to correspondences.

use crate::kernels::matching::search_center;
use crate::target::FeaturePoint;
use crate::transform::{compute_screen_coordinate, Matrix34};

/// The winning candidate of one feature slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Candidate offset from the predicted location, in keyframe pixels.
    pub best_offset: [i64; 2],
    /// Score of the candidate, possibly a sentinel.
    pub similarity: f32,
}

/// Reduce the score buffer to one [`MatchResult`] per slot.
///
/// `scores` holds `search_offsets.len()` consecutive scores per slot. The
/// maximum wins; on ties the first candidate in row-major order is kept.
pub fn select_best_matches(scores: &[f32], search_offsets: &[[i64; 2]]) -> Vec<MatchResult> {
    if search_offsets.is_empty() {
        return Vec::new();
    }

    scores
        .chunks_exact(search_offsets.len())
        .map(|slot| {
            let mut best = 0;
            for (i, &s) in slot.iter().enumerate().skip(1) {
                if s > slot[best] {
                    best = i;
                }
            }
            MatchResult {
                best_offset: search_offsets[best],
                similarity: slot[best],
            }
        })
        .collect()
}

/// The refined location of a feature in reference-world units.
///
/// The offset is applied to the pixel the search grid was centered on, so a
/// fractional feature point refines to the pixel that was actually matched.
///
/// # Example
///
/// ```
/// use kornia_tracking::extract::refined_location;
/// use kornia_tracking::FeaturePoint;
///
/// let refined = refined_location(FeaturePoint::new(10.0, 4.0), [2, 0], 2.0);
/// assert_eq!(refined, [6.0, 2.0]);
/// ```
pub fn refined_location(point: FeaturePoint, offset: [i64; 2], scale: f32) -> [f32; 2] {
    let [cx, cy] = search_center([point.x, point.y]);
    [
        (cx + offset[0]) as f32 / scale,
        (cy + offset[1]) as f32 / scale,
    ]
}

/// The accepted correspondences of one target in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    /// Unrefined reference-world coordinates, `z = 0`.
    pub world_coords: Vec<[f32; 3]>,
    /// Camera pixel coordinates of the refined matches, aligned with `world_coords`.
    pub screen_coords: Vec<[f32; 2]>,
    /// Indices of the accepted feature points.
    pub good_track: Vec<usize>,
    /// Refined locations of every real slot before thresholding.
    pub candidates: Vec<[f32; 2]>,
    /// Best similarity of every real slot before thresholding.
    pub similarities: Vec<f32>,
}

impl Correspondences {
    /// Number of accepted correspondences.
    pub fn len(&self) -> usize {
        self.world_coords.len()
    }

    /// Whether no correspondence was accepted.
    pub fn is_empty(&self) -> bool {
        self.world_coords.is_empty()
    }
}

/// Turn the per-slot matches of a target into correspondences.
///
/// Only the first `points.len()` entries of `matches` are read, so padding
/// slots never reach the output.
///
/// # Arguments
///
/// * `points` - The real feature points of the target.
/// * `matches` - One match per slot, padding included.
/// * `scale` - Keyframe pixels per reference-world unit.
/// * `mvp` - The unscaled model-view-projection.
/// * `threshold` - A match is accepted when its similarity is strictly greater.
pub fn extract_correspondences(
    points: &[FeaturePoint],
    matches: &[MatchResult],
    scale: f32,
    mvp: &Matrix34,
    threshold: f32,
) -> Correspondences {
    let mut out = Correspondences::default();

    for (i, (point, m)) in points.iter().zip(matches.iter()).enumerate() {
        let refined = refined_location(*point, m.best_offset, scale);
        out.candidates.push(refined);
        out.similarities.push(m.similarity);

        if m.similarity <= threshold {
            continue;
        }
        let Some(screen) = compute_screen_coordinate(mvp, refined[0], refined[1]) else {
            log::warn!("feature {i} projects onto the camera plane, skipping");
            continue;
        };

        out.world_coords.push([point.x / scale, point.y / scale, 0.0]);
        out.screen_coords.push(screen);
        out.good_track.push(i);
    }

    out
}
