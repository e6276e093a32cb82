use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use thiserror::Error;
use tracing::debug;

use crate::enums::ModalityType;
use crate::landmarks::{LandmarkError, ReferencePoints};
use crate::metadata::StudyMetadata;
use crate::segmentation::{Segmentation, SegmentationError};
use crate::series::Series;
use crate::series_loader::{SeriesLoader, SeriesLoaderError};

#[derive(Debug, Error)]
pub enum StudyError {
    #[error("Path for modality {0} is not set")]
    MissingSeriesPath(ModalityType),

    #[error("{modality} series folder not found: {path}")]
    SeriesFolderNotFound { modality: ModalityType, path: PathBuf },

    #[error("Could not load {modality} series: {source}")]
    Series {
        modality: ModalityType,
        source: SeriesLoaderError,
    },

    #[error("Could not load {modality} landmarks: {source}")]
    Landmarks {
        modality: ModalityType,
        source: LandmarkError,
    },

    #[error("Could not load segmentation: {0}")]
    Segmentation(#[from] SegmentationError),
}

/// A value computed on first access and shared afterwards.
///
/// Concurrent first accesses may each run the initializer; the first value
/// stored wins and the others are dropped.
#[derive(Debug)]
pub struct LazySlot<T> {
    cell: OnceLock<T>,
}

impl<T> Default for LazySlot<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T> LazySlot<T> {
    pub fn with_value(value: T) -> Self {
        Self {
            cell: OnceLock::from(value),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Return the cached value or run `init`. A failed `init` leaves the
    /// slot empty.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }
}

/// Everything a study holds for one sequence.
#[derive(Debug, Default)]
pub struct ModalityRecord {
    pub series_path: Option<PathBuf>,
    pub series: LazySlot<Series>,
    pub reference_points: Option<ReferencePoints>,
}

/// One examination: a segmentation drawn on its native sequence, landmark
/// annotations per sequence, and the image series of every sequence, loaded
/// on first use.
#[derive(Debug)]
pub struct Study {
    segmentation: Segmentation,
    native_modality: ModalityType,
    records: [ModalityRecord; 4],
}

impl Study {
    pub fn new(segmentation: Segmentation, native_modality: ModalityType) -> Self {
        Self {
            segmentation,
            native_modality,
            records: std::array::from_fn(|_| ModalityRecord::default()),
        }
    }

    /// Folder the series of `modality` is read from on first access.
    pub fn with_series_path(mut self, modality: ModalityType, path: impl Into<PathBuf>) -> Self {
        self.records[modality.index()].series_path = Some(path.into());
        self
    }

    /// Use an already loaded series for `modality`.
    pub fn with_series(mut self, modality: ModalityType, series: Series) -> Self {
        self.records[modality.index()].series = LazySlot::with_value(series);
        self
    }

    pub fn with_reference_points(
        mut self,
        modality: ModalityType,
        points: ReferencePoints,
    ) -> Self {
        self.records[modality.index()].reference_points = Some(points);
        self
    }

    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Sequence the segmentation was drawn on.
    pub fn native_modality(&self) -> ModalityType {
        self.native_modality
    }

    pub fn record(&self, modality: ModalityType) -> &ModalityRecord {
        &self.records[modality.index()]
    }

    pub fn reference_points(&self, modality: ModalityType) -> Option<&ReferencePoints> {
        self.record(modality).reference_points.as_ref()
    }

    pub fn is_series_loaded(&self, modality: ModalityType) -> bool {
        self.record(modality).series.is_initialized()
    }

    /// The series of `modality`, read from its folder on first access and
    /// cached for the lifetime of the study.
    pub fn series(&self, modality: ModalityType) -> Result<&Series, StudyError> {
        let record = self.record(modality);
        record.series.get_or_try_init(|| {
            let path = record
                .series_path
                .as_deref()
                .ok_or(StudyError::MissingSeriesPath(modality))?;
            if !path.exists() {
                return Err(StudyError::SeriesFolderNotFound {
                    modality,
                    path: path.to_path_buf(),
                });
            }
            debug!(%modality, path = %path.display(), "loading series");
            SeriesLoader::load_from_directory(path)
                .map_err(|source| StudyError::Series { modality, source })
        })
    }

    /// Load a study folder laid out as
    ///
    /// ```text
    /// <folder>/
    ///   cort1_annotations.json
    ///   sagt2_annotations.json
    ///   trapdf_annotations.json
    ///   seg*.nrrd
    ///   <series instance uid>/   one folder per sequence
    /// ```
    ///
    /// The segmentation is drawn on the coronal T1 sequence.
    pub fn load_from_folder(
        folder: impl AsRef<Path>,
        metadata: &StudyMetadata,
    ) -> Result<Self, StudyError> {
        let folder = folder.as_ref();

        let mut reference_points = Vec::new();
        for modality in ModalityType::ALL {
            if let Some(file) = modality.annotation_file() {
                let points = ReferencePoints::load_from_file(folder.join(file))
                    .map_err(|source| StudyError::Landmarks { modality, source })?;
                reference_points.push((modality, points));
            }
        }

        let mut series_paths = Vec::new();
        for modality in ModalityType::ALL {
            if let Some(uid) = metadata.series_uid(modality) {
                let path = folder.join(uid);
                if !path.exists() {
                    return Err(StudyError::SeriesFolderNotFound { modality, path });
                }
                series_paths.push((modality, path));
            }
        }

        let segmentation = Segmentation::load_from_folder(folder)?;

        let mut study = Study::new(segmentation, ModalityType::CorT1);
        for (modality, points) in reference_points {
            study = study.with_reference_points(modality, points);
        }
        for (modality, path) in series_paths {
            study = study.with_series_path(modality, path);
        }
        Ok(study)
    }
}
