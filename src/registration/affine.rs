use super::{Label, RegistrationError, fill_volume};
use crate::geometry::round_into_range;

use nalgebra::{DMatrix, Matrix3, Vector3};
use ndarray::Array3;

/// Relative singular value threshold for the landmark design matrix.
const RANK_TOLERANCE: f64 = 1e-10;
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// `y = matrix * x + offset`
#[derive(Clone, Debug, PartialEq)]
pub struct AffineTransform {
    pub matrix: Matrix3<f64>,
    pub offset: Vector3<f64>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            offset: Vector3::zeros(),
        }
    }

    /// Least squares fit of `target ≈ matrix * source + offset` on point
    /// pairs.
    ///
    /// Solves `[source | 1] * X = target` for the 4×3 matrix `X`; its first
    /// three rows transposed form `matrix`, the last row is `offset`.
    ///
    /// # Errors
    ///
    /// Fewer than four pairs, or points that do not span 3D space, cannot
    /// determine the transform.
    pub fn estimate(
        source: &[Vector3<f64>],
        target: &[Vector3<f64>],
    ) -> Result<Self, RegistrationError> {
        let count = source.len().min(target.len());
        if count < 4 {
            return Err(RegistrationError::InsufficientLandmarks {
                found: count,
                required: 4,
            });
        }

        let design = DMatrix::from_fn(count, 4, |i, j| if j < 3 { source[i][j] } else { 1.0 });
        let observed = DMatrix::from_fn(count, 3, |i, j| target[i][j]);

        let svd = design.svd(true, true);
        let largest = svd.singular_values.max();
        let rank = svd.rank(largest * RANK_TOLERANCE);
        if rank < 4 {
            return Err(RegistrationError::DegenerateLandmarks { rank });
        }
        let solution = svd
            .solve(&observed, largest * RANK_TOLERANCE)
            .map_err(RegistrationError::LeastSquares)?;

        Ok(Self {
            matrix: Matrix3::from_fn(|i, j| solution[(j, i)]),
            offset: Vector3::new(solution[(3, 0)], solution[(3, 1)], solution[(3, 2)]),
        })
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * point + self.offset
    }

    /// Euclidean distance between each mapped source point and its target.
    pub fn residuals(&self, source: &[Vector3<f64>], target: &[Vector3<f64>]) -> Vec<f64> {
        source
            .iter()
            .zip(target)
            .map(|(s, t)| (self.apply(s) - t).norm())
            .collect()
    }

    /// `matrix⁻¹` with offset `-matrix⁻¹ * offset`.
    pub fn inverse(&self) -> Result<Self, RegistrationError> {
        if self.matrix.determinant().abs() < SINGULAR_DETERMINANT {
            return Err(RegistrationError::SingularTransform);
        }
        let matrix = self
            .matrix
            .try_inverse()
            .ok_or(RegistrationError::SingularTransform)?;
        Ok(Self {
            offset: -(matrix * self.offset),
            matrix,
        })
    }

    /// Nearest neighbour resampling of `input` into an `output_shape` volume
    /// where this transform maps output indices to input indices. Output
    /// voxels mapping outside `input` are background.
    pub fn resample<T: Label>(
        &self,
        input: &Array3<T>,
        output_shape: (usize, usize, usize),
        parallel: bool,
    ) -> Array3<T> {
        let (d0, d1, d2) = input.dim();
        fill_volume(output_shape, parallel, |(i, j, k)| {
            let source = self.apply(&Vector3::new(i as f64, j as f64, k as f64));
            match (
                round_into_range(source.x, d0),
                round_into_range(source.y, d1),
                round_into_range(source.z, d2),
            ) {
                (Some(a), Some(b), Some(c)) => input[[a, b, c]],
                _ => T::default(),
            }
        })
    }
}
