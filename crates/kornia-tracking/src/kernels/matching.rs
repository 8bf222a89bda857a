use kornia_image::ImageSize;

use crate::device::{Device, DeviceBuffer, DeviceError};
use crate::error::TrackerError;
use crate::parallel::{self, ExecutionStrategy};

/// Score of a candidate whose window leaves the valid rectified region.
pub const SENTINEL_OUT_OF_BOUNDS: f32 = -2.0;

/// Score of a candidate whose rectified window has no variance.
pub const SENTINEL_FLAT_POINT: f32 = -3.0;

/// Score of a candidate whose template window has no variance.
pub const SENTINEL_FLAT_TEMPLATE: f32 = -4.0;

/// Variances below this are treated as zero.
pub const VARIANCE_EPSILON: f64 = 1e-7;

/// Template and search window parameters of the matching kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchingParams {
    /// Half size of the dense template window.
    pub template_half_size: usize,
    /// Template stride. Not used as a sampling stride: the window is dense.
    pub template_gap: usize,
    /// Number of candidates on each side of the predicted location.
    pub search_grid_half_count: usize,
    /// Distance in pixels between adjacent candidates.
    pub search_gap: usize,
}

impl MatchingParams {
    /// Number of candidates per axis, `2 * search_grid_half_count + 1`.
    pub fn search_one_size(&self) -> usize {
        2 * self.search_grid_half_count + 1
    }

    /// Number of candidates per feature.
    pub fn num_candidates(&self) -> usize {
        self.search_one_size() * self.search_one_size()
    }

    /// Side of the template window, `2 * template_half_size + 1`.
    pub fn template_one_size(&self) -> usize {
        2 * self.template_half_size + 1
    }
}

/// The structural parameters a matching kernel is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchingKey {
    /// Feature slots per target.
    pub max_count: usize,
    /// Window parameters.
    pub params: MatchingParams,
}

/// Running sums of a point window against a template window.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WindowSums {
    /// Number of pixel pairs.
    pub count: usize,
    /// Sum of rectified values.
    pub sum_point: f64,
    /// Sum of squared rectified values.
    pub sum_point2: f64,
    /// Sum of template values.
    pub sum_template: f64,
    /// Sum of squared template values.
    pub sum_template2: f64,
    /// Sum of products.
    pub sum_point_template: f64,
}

impl WindowSums {
    /// Accumulate one pixel pair.
    #[inline]
    pub fn add(&mut self, point: f64, template: f64) {
        self.count += 1;
        self.sum_point += point;
        self.sum_point2 += point * point;
        self.sum_template += template;
        self.sum_template2 += template * template;
        self.sum_point_template += point * template;
    }

    /// Normalized cross correlation of the accumulated windows.
    ///
    /// Returns [`SENTINEL_FLAT_POINT`] or [`SENTINEL_FLAT_TEMPLATE`] when the
    /// corresponding window is flat, otherwise a score in `[-1, 1]`.
    pub fn similarity(&self) -> f32 {
        let count = self.count as f64;
        // cancellation may leave a tiny negative residue
        let point_var = (self.sum_point2 - self.sum_point * self.sum_point / count)
            .max(0.0)
            .sqrt();
        let template_var = (self.sum_template2
            - self.sum_template * self.sum_template / count)
            .max(0.0)
            .sqrt();

        if self.count == 0 || point_var < VARIANCE_EPSILON {
            return SENTINEL_FLAT_POINT;
        }
        if template_var < VARIANCE_EPSILON {
            return SENTINEL_FLAT_TEMPLATE;
        }

        let cov = self.sum_point_template - self.sum_point * self.sum_template / count;
        (cov / (point_var * template_var)).clamp(-1.0, 1.0) as f32
    }
}

/// The pixel a feature's search grid is centered on, `floor(p + 0.5)`.
pub fn search_center(point: [f32; 2]) -> [i64; 2] {
    [(point[0] + 0.5).floor() as i64, (point[1] + 0.5).floor() as i64]
}

/// Normalized cross correlation of two equally sized windows.
///
/// # Example
///
/// ```
/// use kornia_tracking::kernels::matching::normalized_cross_correlation;
///
/// let a = [1.0, 2.0, 4.0, 8.0];
/// let b = [3.0, 5.0, 9.0, 17.0]; // 2 * a + 1
///
/// assert!((normalized_cross_correlation(&a, &b) - 1.0).abs() < 1e-6);
/// ```
pub fn normalized_cross_correlation(point: &[f32], template: &[f32]) -> f32 {
    let mut sums = WindowSums::default();
    for (&p, &t) in point.iter().zip(template.iter()) {
        sums.add(p as f64, t as f64);
    }
    sums.similarity()
}

/// Strided NCC search around every feature slot.
///
/// Compiling the kernel precomputes the candidate offsets, in row-major
/// order, and the offsets of the dense template window.
#[derive(Debug)]
pub struct MatchingKernel {
    key: MatchingKey,
    search_offsets: Vec<[i64; 2]>,
    window_offsets: Vec<[i64; 2]>,
}

impl MatchingKernel {
    /// Build the kernel for `key`.
    pub fn compile(key: MatchingKey) -> Self {
        let params = key.params;
        let half = params.search_grid_half_count as i64;
        let gap = params.search_gap as i64;

        let mut search_offsets = Vec::with_capacity(params.num_candidates());
        for sy in -half..=half {
            for sx in -half..=half {
                search_offsets.push([sx * gap, sy * gap]);
            }
        }

        let t = params.template_half_size as i64;
        let mut window_offsets = Vec::with_capacity(params.template_one_size().pow(2));
        for wy in -t..=t {
            for wx in -t..=t {
                window_offsets.push([wx, wy]);
            }
        }

        Self {
            key,
            search_offsets,
            window_offsets,
        }
    }

    /// The key the kernel was compiled for.
    pub fn key(&self) -> MatchingKey {
        self.key
    }

    /// Pixel offsets of the candidates relative to the predicted location.
    pub fn search_offsets(&self) -> &[[i64; 2]] {
        &self.search_offsets
    }

    /// Number of candidates per feature slot.
    pub fn num_candidates(&self) -> usize {
        self.search_offsets.len()
    }

    /// Score every candidate of every feature slot.
    ///
    /// # Arguments
    ///
    /// * `device` - Device the scores are allocated on.
    /// * `rectified` - Output of the projection kernel.
    /// * `template` - The keyframe pixels.
    /// * `size` - Size shared by `rectified` and `template`.
    /// * `slots` - Exactly `max_count` feature locations in keyframe pixels.
    /// * `strategy` - How to spread the slots over threads.
    ///
    /// # Returns
    ///
    /// A `max_count * num_candidates` buffer; slot `i` owns the range
    /// `i * num_candidates..(i + 1) * num_candidates`.
    pub fn dispatch(
        &self,
        device: &Device,
        rectified: &[f32],
        template: &[u8],
        size: ImageSize,
        slots: &[[f32; 2]],
        strategy: ExecutionStrategy,
    ) -> Result<DeviceBuffer<f32>, TrackerError> {
        let num_candidates = self.num_candidates();
        let len = self
            .key
            .max_count
            .checked_mul(num_candidates)
            .ok_or(DeviceError::CapacityOverflow(self.key.max_count))?;
        let mut dst = device.alloc(len, SENTINEL_OUT_OF_BOUNDS)?;

        parallel::dispatch_chunks(strategy, dst.as_mut_slice(), num_candidates, |i, scores| {
            let Some(&[px, py]) = slots.get(i) else {
                return;
            };
            let center = search_center([px, py]);
            if !self.window_inside(center, size) {
                return;
            }
            for (score, offset) in scores.iter_mut().zip(self.search_offsets.iter()) {
                let candidate = [center[0] + offset[0], center[1] + offset[1]];
                *score = self.score(rectified, template, size, center, candidate);
            }
        })?;

        Ok(dst)
    }

    fn window_inside(&self, center: [i64; 2], size: ImageSize) -> bool {
        let t = self.key.params.template_half_size as i64;
        center[0] >= t
            && center[1] >= t
            && center[0] < size.width as i64 - t
            && center[1] < size.height as i64 - t
    }

    fn score(
        &self,
        rectified: &[f32],
        template: &[u8],
        size: ImageSize,
        center: [i64; 2],
        candidate: [i64; 2],
    ) -> f32 {
        if !self.window_inside(candidate, size) {
            return SENTINEL_OUT_OF_BOUNDS;
        }

        let width = size.width as i64;
        let mut sums = WindowSums::default();
        for [wx, wy] in self.window_offsets.iter() {
            let p = rectified[((candidate[1] + wy) * width + candidate[0] + wx) as usize];
            if p < 0.0 {
                // touches a pixel the projection could not sample
                return SENTINEL_OUT_OF_BOUNDS;
            }
            let t = template[((center[1] + wy) * width + center[0] + wx) as usize];
            sums.add(p as f64, t as f64);
        }
        sums.similarity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::projection::INVALID_PIXEL;
    use approx::assert_relative_eq;

    fn texture(x: usize, y: usize) -> u8 {
        let mut h = (x as u32).wrapping_mul(374_761_393) ^ (y as u32).wrapping_mul(668_265_263);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h >> 24) as u8
    }

    fn params(t: usize, h: usize, gap: usize) -> MatchingParams {
        MatchingParams {
            template_half_size: t,
            template_gap: 1,
            search_grid_half_count: h,
            search_gap: gap,
        }
    }

    #[test]
    fn test_ncc_sentinels() {
        let textured = [3.0, 7.0, 1.0, 9.0];
        let flat = [5.0; 4];

        assert_eq!(normalized_cross_correlation(&flat, &textured), SENTINEL_FLAT_POINT);
        assert_eq!(normalized_cross_correlation(&textured, &flat), SENTINEL_FLAT_TEMPLATE);
        // the point check comes first
        assert_eq!(normalized_cross_correlation(&flat, &flat), SENTINEL_FLAT_POINT);

        let big_flat = [255.0; 169];
        let mut big_textured = [0.0; 169];
        big_textured
            .iter_mut()
            .enumerate()
            .for_each(|(i, v)| *v = texture(i, 3) as f32);
        assert_eq!(
            normalized_cross_correlation(&big_flat, &big_textured),
            SENTINEL_FLAT_POINT
        );
        assert_eq!(
            normalized_cross_correlation(&big_textured, &big_flat),
            SENTINEL_FLAT_TEMPLATE
        );
    }

    #[test]
    fn test_ncc_bounds() {
        let a = (0..49).map(|i| texture(i, 0) as f32).collect::<Vec<_>>();
        let b = (0..49).map(|i| texture(i, 1) as f32).collect::<Vec<_>>();
        let inverted = a.iter().map(|v| 255.0 - v).collect::<Vec<_>>();

        assert_relative_eq!(normalized_cross_correlation(&a, &a), 1.0, epsilon = 1e-6);
        assert_relative_eq!(
            normalized_cross_correlation(&a, &inverted),
            -1.0,
            epsilon = 1e-6
        );
        let s = normalized_cross_correlation(&a, &b);
        assert!((-1.0..=1.0).contains(&s));
        assert!(s < 0.9);
    }

    #[test]
    fn test_compile_offsets() {
        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: 1,
            params: params(1, 1, 3),
        });
        assert_eq!(kernel.num_candidates(), 9);
        assert_eq!(kernel.search_offsets()[0], [-3, -3]);
        assert_eq!(kernel.search_offsets()[1], [0, -3]);
        assert_eq!(kernel.search_offsets()[4], [0, 0]);
        assert_eq!(kernel.search_offsets()[8], [3, 3]);
        assert_eq!(kernel.window_offsets.len(), 9);
    }

    #[test]
    fn test_oversized_score_buffer() {
        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: usize::MAX / 2,
            params: params(1, 1, 1),
        });
        let size = ImageSize {
            width: 3,
            height: 3,
        };
        let result = kernel.dispatch(
            &Device::new(),
            &[0.0; 9],
            &[0; 9],
            size,
            &[],
            ExecutionStrategy::Serial,
        );
        assert!(matches!(
            result,
            Err(TrackerError::Device(DeviceError::CapacityOverflow(_)))
        ));
    }

    #[test]
    fn test_identical_gradient_window() -> Result<(), TrackerError> {
        // 5x5 gradient, one feature in the middle, window covering the whole image
        let size = ImageSize {
            width: 5,
            height: 5,
        };
        let template = (0..25).map(|i| (i % 5 + 2 * (i / 5)) as u8 * 10).collect::<Vec<_>>();
        let rectified = template.iter().map(|&v| v as f32).collect::<Vec<_>>();

        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: 1,
            params: params(2, 1, 1),
        });
        let scores = kernel.dispatch(
            &Device::new(),
            &rectified,
            &template,
            size,
            &[[2.0, 2.0]],
            ExecutionStrategy::Serial,
        )?;

        // only the zero offset keeps the window inside the image
        for (i, &s) in scores.as_slice().iter().enumerate() {
            if i == 4 {
                assert_relative_eq!(s, 1.0, epsilon = 1e-6);
            } else {
                assert_eq!(s, SENTINEL_OUT_OF_BOUNDS);
            }
        }
        Ok(())
    }

    #[test]
    fn test_shifted_texture() -> Result<(), TrackerError> {
        let size = ImageSize {
            width: 24,
            height: 24,
        };
        let template = (0..24 * 24)
            .map(|i| texture(i % 24, i / 24))
            .collect::<Vec<_>>();
        // rectified content moved right by 2 pixels
        let rectified = (0..24 * 24)
            .map(|i: usize| texture((i % 24).wrapping_sub(2), i / 24) as f32)
            .collect::<Vec<_>>();

        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: 2,
            params: params(3, 2, 2),
        });
        let scores = kernel.dispatch(
            &Device::new(),
            &rectified,
            &template,
            size,
            &[[12.0, 12.0], [-1.0, -1.0]],
            ExecutionStrategy::ParallelElements,
        )?;
        let n = kernel.num_candidates();
        let feature = &scores.as_slice()[..n];

        // offset (+2, 0) is index 2 * 5 + 3
        assert_relative_eq!(feature[13], 1.0, epsilon = 1e-6);
        for (i, &s) in feature.iter().enumerate() {
            assert!((-1.0..=1.0).contains(&s));
            if i != 13 {
                assert!(s < 0.9, "candidate {i} scored {s}");
            }
        }

        // the padding slot never produces a score
        assert!(scores.as_slice()[n..]
            .iter()
            .all(|&s| s == SENTINEL_OUT_OF_BOUNDS));
        Ok(())
    }

    #[test]
    fn test_flat_windows() -> Result<(), TrackerError> {
        let size = ImageSize {
            width: 7,
            height: 7,
        };
        let textured = (0..49).map(|i| texture(i % 7, i / 7)).collect::<Vec<_>>();
        let flat = vec![90u8; 49];
        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: 1,
            params: params(1, 0, 1),
        });

        let flat_rectified = vec![42.0f32; 49];
        let textured_rectified = textured.iter().map(|&v| v as f32).collect::<Vec<_>>();

        let scores = kernel.dispatch(
            &Device::new(),
            &flat_rectified,
            &textured,
            size,
            &[[3.0, 3.0]],
            ExecutionStrategy::Serial,
        )?;
        assert_eq!(scores.as_slice(), &[SENTINEL_FLAT_POINT]);

        let scores = kernel.dispatch(
            &Device::new(),
            &textured_rectified,
            &flat,
            size,
            &[[3.0, 3.0]],
            ExecutionStrategy::Serial,
        )?;
        assert_eq!(scores.as_slice(), &[SENTINEL_FLAT_TEMPLATE]);
        Ok(())
    }

    #[test]
    fn test_invalid_rectified_pixel() -> Result<(), TrackerError> {
        let size = ImageSize {
            width: 7,
            height: 7,
        };
        let template = (0..49).map(|i| texture(i % 7, i / 7)).collect::<Vec<_>>();
        let mut rectified = template.iter().map(|&v| v as f32).collect::<Vec<_>>();
        rectified[2 * 7 + 2] = INVALID_PIXEL;

        let kernel = MatchingKernel::compile(MatchingKey {
            max_count: 1,
            params: params(1, 0, 1),
        });
        let scores = kernel.dispatch(
            &Device::new(),
            &rectified,
            &template,
            size,
            &[[3.0, 3.0]],
            ExecutionStrategy::Serial,
        )?;
        assert_eq!(scores.as_slice(), &[SENTINEL_OUT_OF_BOUNDS]);
        Ok(())
    }
}
