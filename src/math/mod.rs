//! Vector and matrix primitives backing orientation and collision math

pub mod matrix;
pub mod vector;

pub use matrix::Matrix3;
pub use vector::Vector3D;

/// Math errors
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum MathError {
    #[error("Matrix is singular (determinant {determinant})")]
    Singular { determinant: f64 },
}
