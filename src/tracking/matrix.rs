//! 4x4 homogeneous transformation matrices
//!
//! Rigid transforms are stored in double precision so that chained
//! compositions accumulate as little rounding as possible. The wire format
//! narrows to `f32` only at encoding time.

use std::ops::Mul;

/// Tolerance used when checking that a configured matrix is rigid
pub const RIGID_TOLERANCE: f64 = 1e-3;

/// 4x4 homogeneous transformation matrix, row-major
///
/// - Upper-left 3x3: rotation
/// - Upper-right 3x1: translation
/// - Bottom row: [0, 0, 0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4(pub [[f64; 4]; 4]);

impl Matrix4 {
    /// Identity transformation
    pub const IDENTITY: Matrix4 = Matrix4([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Identity transformation
    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Translation-only transformation
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0][3] = x;
        m.0[1][3] = y;
        m.0[2][3] = z;
        m
    }

    /// Rotation about the Z axis followed by a translation
    pub fn rotation_z(angle_rad: f64, x: f64, y: f64, z: f64) -> Self {
        let (s, c) = angle_rad.sin_cos();
        Matrix4([
            [c, -s, 0.0, x],
            [s, c, 0.0, y],
            [0.0, 0.0, 1.0, z],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Build from 16 values in row-major order
    ///
    /// Returns `None` if the slice does not hold exactly 16 values.
    ///
    /// # Examples
    ///
    /// ```
    /// use igtl_tracking_server::tracking::Matrix4;
    ///
    /// let values = [
    ///     1.0, 0.0, 0.0, 10.0,
    ///     0.0, 1.0, 0.0, 20.0,
    ///     0.0, 0.0, 1.0, 30.0,
    ///     0.0, 0.0, 0.0, 1.0,
    /// ];
    /// let m = Matrix4::from_row_major(&values).unwrap();
    /// assert_eq!(m.translation_part(), [10.0, 20.0, 30.0]);
    /// ```
    pub fn from_row_major(values: &[f64]) -> Option<Self> {
        if values.len() != 16 {
            return None;
        }
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row.copy_from_slice(&values[i * 4..i * 4 + 4]);
        }
        Some(Matrix4(m))
    }

    /// Translation column
    pub fn translation_part(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// Inverse of a rigid transform: `[Rᵀ | -Rᵀt]`
    ///
    /// Only meaningful for rigid matrices. The rotation block is transposed
    /// as-is, without re-orthonormalization.
    pub fn rigid_inverse(&self) -> Self {
        let m = &self.0;
        let mut inv = Self::IDENTITY;
        for i in 0..3 {
            for j in 0..3 {
                inv.0[i][j] = m[j][i];
            }
        }
        for i in 0..3 {
            inv.0[i][3] = -(inv.0[i][0] * m[0][3] + inv.0[i][1] * m[1][3] + inv.0[i][2] * m[2][3]);
        }
        inv
    }

    /// Largest absolute deviation of `RᵀR` from the identity
    ///
    /// A perfectly orthonormal rotation block gives 0.
    pub fn orthonormality_error(&self) -> f64 {
        let m = &self.0;
        let mut worst: f64 = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| m[k][i] * m[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                worst = worst.max((dot - expected).abs());
            }
        }
        worst
    }

    /// Determinant of the rotation block
    pub fn rotation_determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Check that this is a rigid transform within `tolerance`
    ///
    /// Requires an orthonormal rotation block with unit scale (det = +1) and
    /// a `[0, 0, 0, 1]` bottom row.
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        let bottom = self.0[3];
        let bottom_ok = bottom[0].abs() <= tolerance
            && bottom[1].abs() <= tolerance
            && bottom[2].abs() <= tolerance
            && (bottom[3] - 1.0).abs() <= tolerance;
        let finite = self.0.iter().flatten().all(|v| v.is_finite());

        finite
            && bottom_ok
            && self.orthonormality_error() <= tolerance
            && (self.rotation_determinant() - 1.0).abs() <= tolerance
    }

    /// Element-wise comparison within `tolerance`
    pub fn approx_eq(&self, other: &Matrix4, tolerance: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Upper 3x4 block narrowed to `f32` for the wire
    pub fn to_f32_3x4(&self) -> [[f32; 4]; 3] {
        let mut out = [[0.0f32; 4]; 3];
        for (dst, src) in out.iter_mut().zip(self.0.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = *s as f32;
            }
        }
        out
    }

    /// Widen a wire 3x4 block, restoring the implicit bottom row
    pub fn from_f32_3x4(block: &[[f32; 4]; 3]) -> Self {
        let mut m = Self::IDENTITY;
        for (dst, src) in m.0.iter_mut().zip(block.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = f64::from(*s);
            }
        }
        m
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix4 {
    type Output = Matrix4;

    fn mul(self, rhs: Matrix4) -> Matrix4 {
        let mut out = [[0.0; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Matrix4(out)
    }
}
