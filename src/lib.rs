//! # DICOM co-registration library
//!
//! This crate transfers a voxel label segmentation drawn on one MR series of
//! a study onto the other series of the same study.
//!
//! Image series are read with the dicom-rs ecosystem, ordered along their
//! slice normal and described by their patient space geometry. Segmentations
//! are read from NRRD files and landmarks from 3D Slicer markup files.
//! If the environment supports it, decoding and resampling run in parallel
//! using rayon.
//!
//! Two registration strategies are provided:
//!  - Voxel projection through patient space, using the DICOM geometry only
//!  - Affine fit on anatomical landmarks annotated in both series
//!
//! Labels are always resampled with nearest neighbour lookup. DICOM files are
//! assumed to have the following attributes:
//!  - No multiframe (always the first frame is used)
//!  - Parallel, evenly spaced slices sharing one orientation
//!
//! # Examples
//!
//! ## Registering a study folder
//!
//! Load the study described by one row of the metadata CSV and transfer its
//! segmentation onto the transversal PD series.
//!
//! ```no_run
//! # use dicom_coreg::{ModalityType, RegistrationConfig, Registrar, Study, StudyMetadata};
//! let metadata = StudyMetadata::read_list_from_csv("studies.csv")
//!     .expect("should have read the metadata CSV");
//! let study = Study::load_from_folder("studies/1.2.3", &metadata[0])
//!     .expect("should have loaded the study folder");
//! let registrar = RegistrationConfig::load("registration.toml")
//!     .expect("should have read the configuration")
//!     .registrar();
//! let labels = registrar
//!     .register(&study, ModalityType::TraPdf)
//!     .expect("should have registered the segmentation");
//! println!("{:?}", labels.dim());
//! ```

pub mod config;
pub mod coordinates;
pub mod enums;
pub mod geometry;
pub mod index;
pub mod landmarks;
pub mod metadata;
pub mod nrrd;
pub mod registration;
pub mod segmentation;
pub mod series;
pub mod series_loader;
pub mod slice;
pub mod study;

pub use config::RegistrationConfig;
pub use coordinates::{CoordinateMapper, ImageCoordinate};
pub use enums::{ModalityType, RegistrationMethod};
pub use geometry::VolumeGeometry;
pub use landmarks::{Landmark, ReferencePoints};
pub use metadata::StudyMetadata;
pub use registration::{
    LandmarkAffineRegistrar, Registrar, RegistrationError, VoxelProjectionRegistrar,
};
pub use segmentation::Segmentation;
pub use series::Series;
pub use series_loader::SeriesLoader;
pub use slice::Slice;
pub use study::Study;
