use crate::series::{Series, SeriesError, plane_normal, position_of, slice_projections};

use nalgebra::{Matrix3x2, Vector3};
use thiserror::Error;
use tracing::warn;

const SVD_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("Could not solve for in-plane indices: {0}")]
    LeastSquares(&'static str),
}

/// Image space position of a patient coordinate.
///
/// The in-plane indices keep their fractional part, the slice index is the
/// nearest slice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageCoordinate {
    pub column: f64,
    pub row: f64,
    pub slice: usize,
}

impl ImageCoordinate {
    /// `[column, row, slice]` with in-plane indices truncated towards zero.
    pub fn voxel_index(&self) -> Vector3<f64> {
        Vector3::new(self.column.trunc(), self.row.trunc(), self.slice as f64)
    }
}

pub struct CoordinateMapper;

impl CoordinateMapper {
    /// Map a patient position (mm) into the image grid of `series`.
    ///
    /// The slice is chosen by nearest projection onto the slice normal,
    /// slices are ordered locally so an unsorted series maps the same as a
    /// sorted one. In-plane indices come from the least squares solution of
    /// `[row_cosines * column_spacing, column_cosines * row_spacing] * (column, row) = delta`,
    /// where `delta` is the offset from the chosen slice's position.
    ///
    /// Indices outside the grid are logged and returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the series is empty, lacks geometry tags, or the
    /// in-plane system cannot be solved.
    pub fn patient_to_image(
        patient_coordinate: &Vector3<f64>,
        series: &Series,
    ) -> Result<ImageCoordinate, CoordinateError> {
        let slices = series.slices();
        let first = slices.first().ok_or(SeriesError::Empty)?;
        let (row_cosines, column_cosines) = first
            .header
            .direction_cosines()
            .ok_or(SeriesError::MissingOrientation)?;
        let [row_spacing, column_spacing] =
            first.header.pixel_spacing.ok_or(SeriesError::MissingPixelSpacing)?;
        let normal = plane_normal(first)?;
        let origin = position_of(slices, 0)?;

        let projections = slice_projections(slices, &normal)?;
        let mut order: Vec<usize> = (0..slices.len()).collect();
        order.sort_by(|&a, &b| projections[a].total_cmp(&projections[b]));

        let query = (patient_coordinate - origin).dot(&normal);
        let mut slice = 0;
        let mut best = f64::INFINITY;
        for (sorted_index, &original_index) in order.iter().enumerate() {
            let distance = (projections[original_index] - query).abs();
            if distance < best {
                best = distance;
                slice = sorted_index;
            }
        }

        let delta = patient_coordinate - position_of(slices, order[slice])?;
        let system = Matrix3x2::from_columns(&[
            row_cosines * column_spacing,
            column_cosines * row_spacing,
        ]);
        let solution = system
            .svd(true, true)
            .solve(&delta, SVD_EPSILON)
            .map_err(CoordinateError::LeastSquares)?;

        let coordinate = ImageCoordinate {
            column: solution[0],
            row: solution[1],
            slice,
        };
        Self::warn_if_outside(&coordinate, series.shape());
        Ok(coordinate)
    }

    fn warn_if_outside(coordinate: &ImageCoordinate, shape: (usize, usize, usize)) {
        let (slices, rows, columns) = shape;
        if !(0.0..columns as f64).contains(&coordinate.column) {
            warn!(
                column = coordinate.column,
                columns, "column index is out of bounds"
            );
        }
        if !(0.0..rows as f64).contains(&coordinate.row) {
            warn!(row = coordinate.row, rows, "row index is out of bounds");
        }
        if coordinate.slice >= slices {
            warn!(slice = coordinate.slice, slices, "slice index is out of bounds");
        }
    }
}
