//! 3x3 matrix with row-major storage
//!
//! Orientation matrices store the body axes as columns (right, up, forward),
//! so `m * local` maps a body-frame vector into world space and the inverse
//! maps world space back into the body frame.

use std::ops::Mul;

use super::{MathError, Vector3D};

/// Determinants smaller than this are treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    pub m: [[f64; 3]; 3],
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3 {
    pub const fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub const fn from_rows(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn from_columns(c0: Vector3D, c1: Vector3D, c2: Vector3D) -> Self {
        Self::from_rows([[c0.x, c1.x, c2.x], [c0.y, c1.y, c2.y], [c0.z, c1.z, c2.z]])
    }

    pub fn column(&self, i: usize) -> Vector3D {
        Vector3D::new(self.m[0][i], self.m[1][i], self.m[2][i])
    }

    /// Rotation about the X axis (pitch)
    pub fn rotation_x(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rows([[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]])
    }

    /// Rotation about the Y axis (yaw)
    pub fn rotation_y(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rows([[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]])
    }

    /// Rotation about the Z axis (roll)
    pub fn rotation_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rows([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Build `Ry(yaw) * Rx(pitch) * Rz(roll)` from `(pitch, yaw, roll)`
    pub fn from_euler(angles: Vector3D) -> Self {
        Self::rotation_y(angles.y)
            .multiply(&Self::rotation_x(angles.x))
            .multiply(&Self::rotation_z(angles.z))
    }

    /// Inverse of [`Matrix3::from_euler`] for a pure rotation
    pub fn to_euler(&self) -> Vector3D {
        let m = &self.m;
        let pitch = (-m[1][2]).clamp(-1.0, 1.0).asin();
        let yaw = m[0][2].atan2(m[2][2]);
        let roll = m[1][0].atan2(m[1][1]);
        Vector3D::new(pitch, yaw, roll)
    }

    /// Standard matrix product `self * rhs`
    pub fn multiply(&self, rhs: &Self) -> Self {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = self.m[r][0] * rhs.m[0][c]
                    + self.m[r][1] * rhs.m[1][c]
                    + self.m[r][2] * rhs.m[2][c];
            }
        }
        Self { m: out }
    }

    pub fn mul_vec(&self, v: Vector3D) -> Vector3D {
        let m = &self.m;
        Vector3D::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse via the adjugate: `inv[i][j] = cofactor[j][i] / det`
    pub fn inverse(&self) -> Result<Self, MathError> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return Err(MathError::Singular { determinant: det });
        }

        let m = &self.m;
        let inv_det = 1.0 / det;
        let adj = [
            [
                m[1][1] * m[2][2] - m[1][2] * m[2][1],
                m[0][2] * m[2][1] - m[0][1] * m[2][2],
                m[0][1] * m[1][2] - m[0][2] * m[1][1],
            ],
            [
                m[1][2] * m[2][0] - m[1][0] * m[2][2],
                m[0][0] * m[2][2] - m[0][2] * m[2][0],
                m[0][2] * m[1][0] - m[0][0] * m[1][2],
            ],
            [
                m[1][0] * m[2][1] - m[1][1] * m[2][0],
                m[0][1] * m[2][0] - m[0][0] * m[2][1],
                m[0][0] * m[1][1] - m[0][1] * m[1][0],
            ],
        ];

        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = adj[r][c] * inv_det;
            }
        }
        Ok(Self { m: out })
    }

    /// Re-orthonormalize a drifting rotation matrix (Gram-Schmidt on the
    /// forward then up columns). `None` when the axes have collapsed.
    pub fn orthonormalized(&self) -> Option<Self> {
        let forward = self.column(2).normalized()?;
        let up = self.column(1);
        let up = (up - forward * up.dot(forward)).normalized()?;
        let right = up.cross(forward);
        Some(Self::from_columns(right, up, forward))
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().flatten().all(|v| v.is_finite())
    }
}

impl Mul for Matrix3 {
    type Output = Matrix3;

    fn mul(self, rhs: Matrix3) -> Self::Output {
        self.multiply(&rhs)
    }
}

impl Mul<Vector3D> for Matrix3 {
    type Output = Vector3D;

    fn mul(self, rhs: Vector3D) -> Self::Output {
        self.mul_vec(rhs)
    }
}
