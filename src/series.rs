use crate::geometry::VolumeGeometry;
use crate::slice::Slice;

use nalgebra::Vector3;
use ndarray::{Array3, s};
use thiserror::Error;
use tracing::debug;

/// Tolerance used when checking whether slice projections are non-decreasing.
pub const DEFAULT_SORT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("Series contains no slices")]
    Empty,

    #[error("Slice {index} is missing ImagePositionPatient")]
    MissingPosition { index: usize },

    #[error("First slice is missing ImageOrientationPatient")]
    MissingOrientation,

    #[error("First slice is missing PixelSpacing")]
    MissingPixelSpacing,

    #[error("Slice {index} is a segmentation object, load it as a segmentation instead")]
    SegmentationObject { index: usize },

    #[error("Slice {index} does not match the SeriesInstanceUID of the series")]
    SeriesUidMismatch { index: usize },

    #[error("Slice {index} does not match the StudyInstanceUID of the series")]
    StudyUidMismatch { index: usize },

    #[error("Slice {index} does not match the pixel array shape of the series")]
    ShapeMismatch { index: usize },

    #[error("Pixel array shape {found:?} does not match series shape {expected:?}")]
    PixelArrayShape {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Row and column cosines are parallel, no slice normal exists")]
    DegenerateOrientation,
}

/// An ordered, validated list of slices sharing one study, one series and
/// one pixel array shape.
///
/// Unless built with [`Series::new_forced`], slices are kept in canonical
/// order: ascending projection of `ImagePositionPatient` onto the slice
/// normal of the first slice.
#[derive(Clone, Debug)]
pub struct Series {
    slices: Vec<Slice>,
}

impl Series {
    /// Validate the slices and bring them into canonical order.
    ///
    /// # Errors
    ///
    /// Returns an error if the slices are empty, lack position or
    /// orientation, contain segmentation objects or disagree in study UID,
    /// series UID or pixel shape.
    pub fn new(slices: Vec<Slice>) -> Result<Self, SeriesError> {
        Self::validate(&slices)?;
        let mut series = Self { slices };
        if !series.is_sorted()? {
            series.sort()?;
        }
        Ok(series)
    }

    /// Wrap the slices without validating or reordering them.
    pub fn new_forced(slices: Vec<Slice>) -> Self {
        Self { slices }
    }

    fn validate(slices: &[Slice]) -> Result<(), SeriesError> {
        let first = slices.first().ok_or(SeriesError::Empty)?;

        if let Some(index) = slices.iter().position(|slice| slice.header.position().is_none()) {
            return Err(SeriesError::MissingPosition { index });
        }
        if first.header.image_orientation_patient.is_none() {
            return Err(SeriesError::MissingOrientation);
        }
        if let Some(index) = slices.iter().position(|slice| slice.header.is_segmentation()) {
            return Err(SeriesError::SegmentationObject { index });
        }
        if let Some(index) = slices
            .iter()
            .position(|slice| slice.header.series_instance_uid != first.header.series_instance_uid)
        {
            return Err(SeriesError::SeriesUidMismatch { index });
        }
        if let Some(index) = slices
            .iter()
            .position(|slice| slice.header.study_instance_uid != first.header.study_instance_uid)
        {
            return Err(SeriesError::StudyUidMismatch { index });
        }
        if let Some(index) = slices.iter().position(|slice| slice.dim() != first.dim()) {
            return Err(SeriesError::ShapeMismatch { index });
        }
        Ok(())
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn into_slices(self) -> Vec<Slice> {
        self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    fn first(&self) -> Result<&Slice, SeriesError> {
        self.slices.first().ok_or(SeriesError::Empty)
    }

    /// Shape of the stacked pixel array (slices, rows, columns)
    pub fn shape(&self) -> (usize, usize, usize) {
        let (rows, columns) = self.slices.first().map(Slice::dim).unwrap_or((0, 0));
        (self.slices.len(), rows, columns)
    }

    pub fn study_uid(&self) -> Option<&str> {
        self.slices.first().map(|slice| slice.header.study_instance_uid.as_str())
    }

    pub fn series_uid(&self) -> Option<&str> {
        self.slices.first().map(|slice| slice.header.series_instance_uid.as_str())
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.slices.first()?.header.patient_id.as_deref()
    }

    /// Position of the top left voxel of the first slice.
    pub fn image_position_patient(&self) -> Option<[f64; 3]> {
        self.slices.first()?.header.image_position_patient
    }

    pub fn image_orientation_patient(&self) -> Option<[f64; 6]> {
        self.slices.first()?.header.image_orientation_patient
    }

    pub fn pixel_spacing(&self) -> Option<[f64; 2]> {
        self.slices.first()?.header.pixel_spacing
    }

    pub fn slice_thickness(&self) -> Option<f64> {
        self.slices.first()?.header.slice_thickness
    }

    pub fn spacing_between_slices(&self) -> Option<f64> {
        self.slices.first()?.header.spacing_between_slices
    }

    /// Unit normal of the acquisition plane of the first slice,
    /// `normalize(row_cosines × column_cosines)`.
    pub fn slice_normal(&self) -> Result<Vector3<f64>, SeriesError> {
        plane_normal(self.first()?)
    }

    /// Displacement of every slice from the first slice along the slice
    /// normal, in storage order.
    pub fn projections(&self) -> Result<Vec<f64>, SeriesError> {
        let normal = self.slice_normal()?;
        slice_projections(&self.slices, &normal)
    }

    /// Whether the slices are in ascending order along the slice normal,
    /// using [`DEFAULT_SORT_TOLERANCE`].
    pub fn is_sorted(&self) -> Result<bool, SeriesError> {
        self.is_sorted_with_tolerance(DEFAULT_SORT_TOLERANCE)
    }

    pub fn is_sorted_with_tolerance(&self, tolerance: f64) -> Result<bool, SeriesError> {
        if self.slices.len() <= 1 {
            return Ok(true);
        }
        let projections = self.projections()?;
        let is_increasing = projections.windows(2).all(|w| w[1] - w[0] >= -tolerance);
        let is_decreasing = projections.windows(2).all(|w| w[0] - w[1] >= -tolerance);

        // Descending series are reordered like any other unsorted series.
        if !is_increasing && is_decreasing {
            debug!(
                series_uid = self.series_uid().unwrap_or_default(),
                "slices are stored in descending order"
            );
        }
        Ok(is_increasing)
    }

    /// Reorder the slices by ascending projection onto the slice normal.
    /// Slices with equal projection keep their relative order.
    pub fn sort(&mut self) -> Result<(), SeriesError> {
        if self.slices.is_empty() {
            return Ok(());
        }
        let projections = self.projections()?;
        let mut ordered: Vec<(f64, Slice)> = projections
            .into_iter()
            .zip(std::mem::take(&mut self.slices))
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.slices = ordered.into_iter().map(|(_, slice)| slice).collect();
        Ok(())
    }

    /// Slice normal with its sign chosen to point from the first towards the
    /// last slice. A single slice yields the uncorrected normal.
    pub fn infer_slice_normal(&self) -> Result<Vector3<f64>, SeriesError> {
        let normal = self.slice_normal()?;
        if self.slices.len() < 2 {
            return Ok(normal);
        }
        let first = position_of(&self.slices, 0)?;
        let last = position_of(&self.slices, self.slices.len() - 1)?;
        if normal.dot(&(last - first)) < 0.0 {
            Ok(-normal)
        } else {
            Ok(normal)
        }
    }

    /// Distance between consecutive slices along the slice normal. Falls back
    /// to `SliceThickness`, then to 1 mm, for single slice series.
    pub fn slice_spacing(&self) -> Result<f64, SeriesError> {
        if self.slices.len() > 1 {
            let normal = self.infer_slice_normal()?;
            let first = position_of(&self.slices, 0)?;
            let second = position_of(&self.slices, 1)?;
            return Ok((second - first).dot(&normal).abs());
        }
        Ok(self.slice_thickness().unwrap_or(1.0))
    }

    /// Patient space geometry of the voxel grid spanned by this series.
    pub fn geometry(&self) -> Result<VolumeGeometry, SeriesError> {
        let first = self.first()?;
        let origin = position_of(&self.slices, 0)?;
        let (row_cosines, column_cosines) = first
            .header
            .direction_cosines()
            .ok_or(SeriesError::MissingOrientation)?;
        let [row_spacing, column_spacing] =
            first.header.pixel_spacing.ok_or(SeriesError::MissingPixelSpacing)?;
        let (slices, rows, columns) = self.shape();

        Ok(VolumeGeometry {
            origin,
            row_cosines,
            column_cosines,
            normal: self.infer_slice_normal()?,
            row_spacing,
            column_spacing,
            slice_spacing: self.slice_spacing()?,
            dim: (columns, rows, slices),
        })
    }

    /// Stack the pixel data of all slices into a (slices, rows, columns) array.
    pub fn pixel_array(&self) -> Array3<u16> {
        let (depth, height, width) = self.shape();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, slice) in self.slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }

    /// Replace the pixel data of every slice. The shape has to match
    /// [`Series::shape`].
    pub fn set_pixel_array(&mut self, pixel_array: &Array3<u16>) -> Result<(), SeriesError> {
        if pixel_array.dim() != self.shape() {
            return Err(SeriesError::PixelArrayShape {
                expected: self.shape(),
                found: pixel_array.dim(),
            });
        }
        for (i, slice) in self.slices.iter_mut().enumerate() {
            slice.pixels.assign(&pixel_array.slice(s![i, .., ..]));
        }
        Ok(())
    }
}

pub(crate) fn plane_normal(slice: &Slice) -> Result<Vector3<f64>, SeriesError> {
    let (row_cosines, column_cosines) = slice
        .header
        .direction_cosines()
        .ok_or(SeriesError::MissingOrientation)?;
    row_cosines
        .cross(&column_cosines)
        .try_normalize(f64::EPSILON)
        .ok_or(SeriesError::DegenerateOrientation)
}

pub(crate) fn position_of(slices: &[Slice], index: usize) -> Result<Vector3<f64>, SeriesError> {
    slices
        .get(index)
        .and_then(|slice| slice.header.position())
        .ok_or(SeriesError::MissingPosition { index })
}

/// Displacement of each slice from the first one along `normal`.
pub(crate) fn slice_projections(
    slices: &[Slice],
    normal: &Vector3<f64>,
) -> Result<Vec<f64>, SeriesError> {
    let origin = position_of(slices, 0)?;
    (0..slices.len())
        .map(|index| Ok((position_of(slices, index)? - origin).dot(normal)))
        .collect()
}
