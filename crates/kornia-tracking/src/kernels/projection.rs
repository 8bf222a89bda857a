use kornia_image::{Image, ImageSize};

use crate::device::{Device, DeviceBuffer};
use crate::error::TrackerError;
use crate::parallel::{self, ExecutionStrategy};
use crate::transform::AdjustedTransform;

/// Value of a rectified pixel whose source is not inside the camera frame.
///
/// Camera intensities are never negative, so the matching kernel can tell
/// these apart from real samples.
pub const INVALID_PIXEL: f32 = -1.0;

/// The structural parameters a projection kernel is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectionKey {
    /// Width of the rectified output.
    pub width: usize,
    /// Height of the rectified output.
    pub height: usize,
    scale_bits: u32,
}

impl ProjectionKey {
    /// Key for a keyframe of the given size and scale.
    pub fn new(size: ImageSize, scale: f32) -> Self {
        Self {
            width: size.width,
            height: size.height,
            scale_bits: scale.to_bits(),
        }
    }

    /// Pixels per reference-world unit.
    pub fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits)
    }
}

/// Backward warp of a camera frame into keyframe space.
///
/// Compiling the kernel precomputes the reference-world coordinate of every
/// output pixel, `(x / scale, y / scale)`.
#[derive(Debug)]
pub struct ProjectionKernel {
    key: ProjectionKey,
    world_grid: Vec<[f32; 2]>,
}

impl ProjectionKernel {
    /// Build the kernel for `key`.
    pub fn compile(key: ProjectionKey) -> Self {
        let scale = key.scale();
        let mut world_grid = Vec::with_capacity(key.width * key.height);
        for y in 0..key.height {
            for x in 0..key.width {
                world_grid.push([x as f32 / scale, y as f32 / scale]);
            }
        }
        Self { key, world_grid }
    }

    /// The key the kernel was compiled for.
    pub fn key(&self) -> ProjectionKey {
        self.key
    }

    /// Size of the rectified output.
    pub fn output_size(&self) -> ImageSize {
        ImageSize {
            width: self.key.width,
            height: self.key.height,
        }
    }

    /// Rectify `frame` with `transform`.
    ///
    /// Each output pixel is the nearest camera pixel, with coordinates rounded
    /// as `floor(v + 0.5)`. Pixels whose source falls on the camera plane or
    /// outside the frame are set to [`INVALID_PIXEL`].
    ///
    /// # Returns
    ///
    /// A `width * height` row-major buffer allocated on `device`.
    pub fn dispatch(
        &self,
        device: &Device,
        frame: &Image<u8, 1>,
        transform: &AdjustedTransform,
        strategy: ExecutionStrategy,
    ) -> Result<DeviceBuffer<f32>, TrackerError> {
        let mut dst = device.alloc(self.world_grid.len(), INVALID_PIXEL)?;

        let m = transform.adjusted();
        let s = transform.precision_adjust();
        let (m00, m01, m03) = (m[0][0] * s, m[0][1] * s, m[0][3] * s);
        let (m10, m11, m13) = (m[1][0] * s, m[1][1] * s, m[1][3] * s);
        let (m20, m21, m23) = (m[2][0] * s, m[2][1] * s, m[2][3] * s);

        let (cols, rows) = (frame.cols() as f32, frame.rows() as f32);
        let src = frame.as_slice();
        let grid = &self.world_grid;
        let width = self.key.width;

        parallel::dispatch_chunks(strategy, dst.as_mut_slice(), width, |row, dst_row| {
            let grid_row = &grid[row * width..(row + 1) * width];
            for (dst_pixel, &[x, y]) in dst_row.iter_mut().zip(grid_row.iter()) {
                let uz = x * m20 + y * m21 + m23;
                if uz == 0.0 {
                    continue;
                }
                let one_over_uz = 1.0 / uz;
                let ux = ((x * m00 + y * m01 + m03) * one_over_uz + 0.5).floor();
                let uy = ((x * m10 + y * m11 + m13) * one_over_uz + 0.5).floor();

                // NaN fails every comparison and stays invalid
                if ux >= 0.0 && ux < cols && uy >= 0.0 && uy < rows {
                    let idx = uy as usize * frame.cols() + ux as usize;
                    *dst_pixel = src[idx] as f32;
                }
            }
        })?;

        Ok(dst)
    }
}
