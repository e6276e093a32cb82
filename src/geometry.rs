use nalgebra::Vector3;

/// Placement of a voxel grid in patient space.
///
/// Voxels are addressed as `[column, row, slice]`. Moving one column steps
/// `column_spacing` mm along the row cosines, moving one row steps
/// `row_spacing` mm along the column cosines (DICOM `PixelSpacing` is
/// `[row_spacing, column_spacing]`).
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeGeometry {
    /// Patient position of voxel `[0, 0, 0]`.
    pub origin: Vector3<f64>,
    pub row_cosines: Vector3<f64>,
    pub column_cosines: Vector3<f64>,
    /// Slice normal pointing towards increasing slice index.
    pub normal: Vector3<f64>,
    pub row_spacing: f64,
    pub column_spacing: f64,
    pub slice_spacing: f64,
    /// (columns, rows, slices)
    pub dim: (usize, usize, usize),
}

impl VolumeGeometry {
    /// Patient position of the voxel at `[column, row, slice]`.
    pub fn patient_position(&self, column: f64, row: f64, slice: f64) -> Vector3<f64> {
        self.origin
            + self.row_cosines * (column * self.column_spacing)
            + self.column_cosines * (row * self.row_spacing)
            + self.normal * (slice * self.slice_spacing)
    }

    /// Continuous `[column, row, slice]` index of a patient position,
    /// obtained by projecting its offset from the origin onto the grid axes.
    pub fn continuous_index(&self, position: &Vector3<f64>) -> Vector3<f64> {
        let delta = position - self.origin;
        Vector3::new(
            delta.dot(&self.row_cosines) / self.column_spacing,
            delta.dot(&self.column_cosines) / self.row_spacing,
            delta.dot(&self.normal) / self.slice_spacing,
        )
    }

    /// Index of the voxel closest to a continuous index, if it lies inside
    /// the grid.
    pub fn nearest_voxel(&self, index: &Vector3<f64>) -> Option<[usize; 3]> {
        let (columns, rows, slices) = self.dim;
        Some([
            round_into_range(index.x, columns)?,
            round_into_range(index.y, rows)?,
            round_into_range(index.z, slices)?,
        ])
    }
}

/// Round half away from zero and keep the result if it lies in `[0, len)`.
pub(crate) fn round_into_range(value: f64, len: usize) -> Option<usize> {
    let rounded = value.round();
    (rounded >= 0.0 && rounded < len as f64).then_some(rounded as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn oblique() -> VolumeGeometry {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        VolumeGeometry {
            origin: Vector3::new(-20.0, 5.0, 12.0),
            row_cosines: Vector3::new(s, s, 0.0),
            column_cosines: Vector3::new(0.0, 0.0, -1.0),
            normal: Vector3::new(-s, s, 0.0),
            row_spacing: 0.8,
            column_spacing: 0.5,
            slice_spacing: 3.0,
            dim: (10, 12, 6),
        }
    }

    #[test]
    fn position_and_index_are_inverse() {
        let geometry = oblique();
        let position = geometry.patient_position(3.0, 7.0, 2.0);
        let index = geometry.continuous_index(&position);
        assert_relative_eq!(index, Vector3::new(3.0, 7.0, 2.0), epsilon = 1e-9);
        assert_eq!(geometry.nearest_voxel(&index), Some([3, 7, 2]));
    }

    #[test]
    fn nearest_voxel_rejects_outside_points() {
        let geometry = oblique();
        assert_eq!(geometry.nearest_voxel(&Vector3::new(-0.6, 0.0, 0.0)), None);
        assert_eq!(geometry.nearest_voxel(&Vector3::new(-0.4, 0.0, 0.0)), Some([0, 0, 0]));
        assert_eq!(geometry.nearest_voxel(&Vector3::new(9.4, 11.0, 5.0)), Some([9, 11, 5]));
        assert_eq!(geometry.nearest_voxel(&Vector3::new(9.5, 11.0, 5.0)), None);
    }
}
