use crate::nrrd::{NrrdError, read_nrrd};

use nalgebra::Vector3;
use ndarray::Array3;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("No segmentation file found in {0}")]
    NotFound(PathBuf),

    #[error("No 'space directions' found in NRRD header of {0}")]
    MissingSpaceDirections(PathBuf),

    #[error("The first two space directions of {0} are not spatial")]
    InvalidSpaceDirections(PathBuf),

    #[error("NRRD error: {0}")]
    Nrrd(#[from] NrrdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A label volume indexed `[column, row, slice]` together with the
/// direction cosines of its first two axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Segmentation {
    labels: Array3<u16>,
    orientation: [f64; 6],
}

impl Segmentation {
    pub fn new(labels: Array3<u16>, orientation: [f64; 6]) -> Self {
        Self {
            labels,
            orientation,
        }
    }

    pub fn labels(&self) -> &Array3<u16> {
        &self.labels
    }

    pub fn into_labels(self) -> Array3<u16> {
        self.labels
    }

    /// Unit direction cosines of the first axis followed by the second axis.
    /// These are the first two NRRD `space directions` normalized, not the
    /// raw vectors whose lengths equal the voxel spacing.
    pub fn orientation(&self) -> [f64; 6] {
        self.orientation
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.labels.dim()
    }

    /// Load a label map from an NRRD file. The orientation is taken from the
    /// first two `space directions` vectors, normalized.
    pub fn load_nrrd(path: impl AsRef<Path>) -> Result<Self, SegmentationError> {
        let path = path.as_ref();
        let (header, labels) = read_nrrd(path)?;

        let directions = header
            .space_directions
            .ok_or_else(|| SegmentationError::MissingSpaceDirections(path.to_path_buf()))?;
        let axis = |index: usize| {
            directions
                .get(index)
                .copied()
                .flatten()
                .and_then(|d| Vector3::from(d).try_normalize(f64::EPSILON))
                .ok_or_else(|| SegmentationError::InvalidSpaceDirections(path.to_path_buf()))
        };
        let first = axis(0)?;
        let second = axis(1)?;

        debug!(path = %path.display(), dim = ?labels.dim(), "loaded segmentation");
        Ok(Self::new(
            labels,
            [first.x, first.y, first.z, second.x, second.y, second.z],
        ))
    }

    /// First `seg*.nrrd` file of a folder, in name order.
    pub fn find_in_folder(folder: impl AsRef<Path>) -> Result<PathBuf, SegmentationError> {
        let folder = folder.as_ref();
        let mut candidates: Vec<PathBuf> = fs::read_dir(folder)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("seg") && name.ends_with(".nrrd"))
            })
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| SegmentationError::NotFound(folder.to_path_buf()))
    }

    pub fn load_from_folder(folder: impl AsRef<Path>) -> Result<Self, SegmentationError> {
        Self::load_nrrd(Self::find_in_folder(folder)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const HEADER: &str = "NRRD0004\ntype: uchar\ndimension: 3\nsizes: 2 2 1\n\
                          space directions: (0,0.5,0) (0,0,-0.5) (3,0,0)\n\
                          endian: little\nencoding: raw\n\n";

    #[test]
    fn loads_first_segmentation_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend([0u8, 1, 2, 3]);
        fs::write(dir.path().join("seg_b.nrrd"), &bytes).unwrap();
        fs::write(dir.path().join("seg_a.nrrd"), &bytes).unwrap();
        fs::write(dir.path().join("image.nrrd"), b"not a segmentation").unwrap();

        let found = Segmentation::find_in_folder(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "seg_a.nrrd");

        let segmentation = Segmentation::load_from_folder(dir.path()).unwrap();
        assert_eq!(segmentation.dim(), (2, 2, 1));
        assert_eq!(segmentation.labels()[[1, 1, 0]], 3);
        let orientation = segmentation.orientation();
        for (value, expected) in orientation.iter().zip([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]) {
            assert_relative_eq!(*value, expected);
        }
    }

    #[test]
    fn missing_segmentation_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Segmentation::load_from_folder(dir.path()),
            Err(SegmentationError::NotFound(_))
        ));
    }

    #[test]
    fn requires_space_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes =
            b"NRRD0004\ntype: uchar\ndimension: 3\nsizes: 1 1 1\nencoding: raw\n\n".to_vec();
        bytes.push(1);
        let path = dir.path().join("seg.nrrd");
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            Segmentation::load_nrrd(&path),
            Err(SegmentationError::MissingSpaceDirections(_))
        ));
    }
}
