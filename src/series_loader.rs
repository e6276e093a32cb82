use crate::series::{Series, SeriesError};
use crate::slice::Slice;

use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SeriesLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Invalid series: {0}")]
    Series(#[from] SeriesError),

    #[error("Could not decode pixel data: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

pub struct SeriesLoader;

impl SeriesLoader {
    /// Build a series from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects, one per image plane
    ///
    /// # Errors
    ///
    /// Returns error if a pixel data element cannot be decoded or the slices
    /// do not form a valid series
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<Series, SeriesLoaderError> {
        if dicom_objects.is_empty() {
            return Err(SeriesLoaderError::NoValidImages);
        }

        let slices = dicom_objects
            .par_iter()
            .map(Slice::from_dicom_object)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Series::new(slices)?)
    }

    /// Load a series from file paths, failing on the first unreadable file
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
    ) -> Result<Series, SeriesLoaderError> {
        let objects = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::load_from_dicom_objects(&objects)
    }

    /// Load a series from every DICOM file of a directory. Files that cannot
    /// be read as DICOM are skipped.
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<Series, SeriesLoaderError> {
        let path = path.as_ref();
        let paths: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|file| match open_file(file) {
                Ok(object) => Some(object),
                Err(err) => {
                    warn!(file = %file.display(), %err, "skipping file that is not DICOM");
                    None
                }
            })
            .collect();

        if objects.is_empty() {
            return Err(SeriesLoaderError::NoValidImages);
        }

        let series = Self::load_from_dicom_objects(&objects)?;
        debug!(
            directory = %path.display(),
            slices = series.len(),
            series_uid = series.series_uid().unwrap_or_default(),
            "loaded series"
        );
        Ok(series)
    }
}
