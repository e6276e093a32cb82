//! Transfer of a segmentation from the grid of its native series into the
//! grid of another series of the same study.
//!
//! Two strategies are available:
//!  - [`VoxelProjectionRegistrar`] maps every target voxel through patient
//!    space into the source grid using the DICOM geometry alone.
//!  - [`LandmarkAffineRegistrar`] fits an affine transform between the two
//!    image grids on corresponding anatomical landmarks.
//!
//! Both resample with nearest neighbour lookup and fill voxels that fall
//! outside the source volume with background (0).

mod affine;
mod dense;
mod landmark;

pub use affine::AffineTransform;
pub use dense::VoxelProjectionRegistrar;
pub use landmark::{LandmarkAffineRegistrar, LandmarkFit, LandmarkPair, filter_landmarks};

use crate::coordinates::CoordinateError;
use crate::enums::ModalityType;
use crate::series::SeriesError;
use crate::study::{Study, StudyError};

use ndarray::{Array3, Zip};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid series: {0}")]
    Validation(#[from] SeriesError),

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    #[error(
        "Only {found} landmark pairs are within the distance threshold, {required} are needed"
    )]
    InsufficientLandmarks { found: usize, required: usize },

    #[error("Landmarks do not span 3D space (rank {rank} of 4)")]
    DegenerateLandmarks { rank: usize },

    #[error("Estimated affine matrix is singular")]
    SingularTransform,

    #[error("Least squares solve failed: {0}")]
    LeastSquares(&'static str),

    #[error("No reference points for modality {0}")]
    MissingReferencePoints(ModalityType),

    #[error(transparent)]
    Study(#[from] StudyError),
}

/// Element type of a label volume. Labels are copied, never blended.
pub trait Label: Copy + Default + PartialEq + Send + Sync {}

impl<T: Copy + Default + PartialEq + Send + Sync> Label for T {}

pub trait Registrar: Send + Sync {
    /// Resample the study's segmentation into the grid of `target`.
    /// Registering to the segmentation's native modality returns it
    /// unchanged.
    fn register(&self, study: &Study, target: ModalityType)
    -> Result<Array3<u16>, RegistrationError>;
}

/// Fill every voxel of a `shape` volume with `sample([column, row, slice])`.
pub(crate) fn fill_volume<T, F>(
    shape: (usize, usize, usize),
    parallel: bool,
    sample: F,
) -> Array3<T>
where
    T: Label,
    F: Fn((usize, usize, usize)) -> T + Sync,
{
    let mut volume = Array3::<T>::default(shape);
    let zip = Zip::indexed(&mut volume);
    if parallel {
        zip.par_for_each(|index, voxel| *voxel = sample(index));
    } else {
        zip.for_each(|index, voxel| *voxel = sample(index));
    }
    volume
}

pub(crate) fn count_foreground<T: Label>(volume: &Array3<T>) -> usize {
    let background = T::default();
    volume.iter().filter(|&&label| label != background).count()
}
