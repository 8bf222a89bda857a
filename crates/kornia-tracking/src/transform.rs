//! Composition of the camera projection with a model pose.

use crate::error::TrackerError;

/// A 3x4 row-major matrix.
pub type Matrix34 = [[f32; 4]; 3];

/// Compose a camera projection with a model pose.
///
/// The pose `[R | t]` is extended with a `[0, 0, 0, 1]` row, so the result
/// `P * [R | t; 0 0 0 1]` maps homogeneous reference-world coordinates to
/// homogeneous camera pixels.
///
/// # Arguments
///
/// * `projection` - The 3x4 camera projection matrix.
/// * `model_view` - The 3x4 model pose.
///
/// # Example
///
/// ```
/// use kornia_tracking::transform::build_model_view_projection;
///
/// let k = [[2.0, 0.0, 1.0, 0.0], [0.0, 2.0, 1.0, 0.0], [0.0, 0.0, 1.0, 0.0]];
/// let pose = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 4.0]];
///
/// let mvp = build_model_view_projection(&k, &pose);
///
/// assert_eq!(mvp[0], [2.0, 0.0, 1.0, 4.0]);
/// assert_eq!(mvp[2], [0.0, 0.0, 1.0, 4.0]);
/// ```
pub fn build_model_view_projection(projection: &Matrix34, model_view: &Matrix34) -> Matrix34 {
    let mut out = [[0.0f32; 4]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for k in 0..3 {
                acc += projection[i][k] as f64 * model_view[k][j] as f64;
            }
            if j == 3 {
                acc += projection[i][3] as f64;
            }
            *value = acc as f32;
        }
    }
    out
}

/// Project a point of the reference plane (`z = 0`) to camera pixels.
///
/// Returns `None` when the point lies on the camera plane or the result is
/// not finite.
pub fn compute_screen_coordinate(mvp: &Matrix34, x: f32, y: f32) -> Option<[f32; 2]> {
    let h = mvp[2][0] * x + mvp[2][1] * y + mvp[2][3];
    if h == 0.0 {
        return None;
    }
    let u = (mvp[0][0] * x + mvp[0][1] * y + mvp[0][3]) / h;
    let v = (mvp[1][0] * x + mvp[1][1] * y + mvp[1][3]) / h;
    (u.is_finite() && v.is_finite()).then_some([u, v])
}

/// A model-view-projection prepared for limited-precision kernels.
///
/// Every entry is divided by `precision_adjust` before it is handed to a
/// kernel, keeping the values small enough for reduced precision storage;
/// the kernel multiplies them back with [`AdjustedTransform::restore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedTransform {
    m: Matrix34,
    precision_adjust: f32,
}

impl AdjustedTransform {
    /// Scale down every entry of `mvp` by `precision_adjust`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NonFiniteTransform`] when an entry of `mvp`, or
    /// of the scaled result, is not finite.
    pub fn new(mvp: &Matrix34, precision_adjust: f32) -> Result<Self, TrackerError> {
        let mut m = *mvp;
        m.iter_mut()
            .flat_map(|row| row.iter_mut())
            .for_each(|v| *v /= precision_adjust);

        if !m.iter().flatten().all(|v| v.is_finite()) {
            return Err(TrackerError::NonFiniteTransform { precision_adjust });
        }

        Ok(Self {
            m,
            precision_adjust,
        })
    }

    /// The scaled-down entries, as stored for the kernel.
    pub fn adjusted(&self) -> &Matrix34 {
        &self.m
    }

    /// The divisor applied to every entry.
    pub fn precision_adjust(&self) -> f32 {
        self.precision_adjust
    }

    /// Multiply the entries back to the original transform.
    pub fn restore(&self) -> Matrix34 {
        let mut m = self.m;
        m.iter_mut()
            .flat_map(|row| row.iter_mut())
            .for_each(|v| *v *= self.precision_adjust);
        m
    }
}
