use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::enums::ModalityType;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Invalid spacing literal '{0}'")]
    InvalidSpacing(String),

    #[error("Invalid slice count '{0}'")]
    InvalidSliceCount(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Voxel spacing of one series as recorded in the study metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    pub voxel_spacing: (Option<f64>, Option<f64>),
    pub slice_thickness: Option<f64>,
    #[serde(default)]
    pub spacing_between_slices: Option<f64>,
}

impl Spacing {
    /// Parse a Python dict literal such as
    /// `{'voxel_spacing': (0.5, 0.5), 'slice_thickness': 3.0, 'spacing_between_slices': None}`.
    pub fn parse_literal(literal: &str) -> Result<Self, MetadataError> {
        let json: String = literal
            .replace("None", "null")
            .chars()
            .map(|c| match c {
                '\'' => '"',
                '(' => '[',
                ')' => ']',
                other => other,
            })
            .collect();
        serde_json::from_str(&json).map_err(|_| MetadataError::InvalidSpacing(literal.to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesMetadata {
    pub series_uid: Option<String>,
    pub spacing: Spacing,
    pub slices: usize,
}

/// Per-study record of the series chosen for each sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StudyMetadata {
    pub study_uid: String,
    pub patient_id: String,
    pub manufacturer: String,
    series: [SeriesMetadata; 4],
}

impl StudyMetadata {
    pub fn new(study_uid: impl Into<String>) -> Self {
        Self {
            study_uid: study_uid.into(),
            ..Self::default()
        }
    }

    pub fn series(&self, modality: ModalityType) -> &SeriesMetadata {
        &self.series[modality.index()]
    }

    pub fn series_mut(&mut self, modality: ModalityType) -> &mut SeriesMetadata {
        &mut self.series[modality.index()]
    }

    pub fn series_uid(&self, modality: ModalityType) -> Option<&str> {
        self.series(modality).series_uid.as_deref()
    }

    /// Build from one CSV row. `study_uid`, `patient_id`, `manufacturer` and
    /// every `<modality>_suid` column are required; slice counts default to 0
    /// and spacings to empty.
    pub fn from_record(record: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let required = |column: &str| {
            record
                .get(column)
                .cloned()
                .ok_or_else(|| MetadataError::MissingColumn(column.to_string()))
        };

        let mut metadata = Self {
            study_uid: required("study_uid")?,
            patient_id: required("patient_id")?,
            manufacturer: required("manufacturer")?,
            ..Self::default()
        };

        for modality in ModalityType::ALL {
            let uid = required(&format!("{modality}_suid"))?;
            let slices = match record.get(&format!("{modality}_slices")).map(|s| s.trim()) {
                None | Some("") => 0,
                Some(value) => value
                    .parse::<f64>()
                    .ok()
                    .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                    .map(|v| v as usize)
                    .ok_or_else(|| MetadataError::InvalidSliceCount(value.to_string()))?,
            };
            let spacing = match record.get(&format!("{modality}_spacing")).map(|s| s.trim()) {
                None | Some("") => Spacing::default(),
                Some(literal) => Spacing::parse_literal(literal)?,
            };

            *metadata.series_mut(modality) = SeriesMetadata {
                series_uid: (!uid.trim().is_empty()).then(|| uid.trim().to_string()),
                spacing,
                slices,
            };
        }
        Ok(metadata)
    }

    /// Read every row of a metadata CSV. Rows that cannot be interpreted are
    /// skipped with a warning.
    pub fn read_list_from_csv(path: impl AsRef<Path>) -> Result<Vec<Self>, MetadataError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut studies = Vec::new();
        for (row, record) in reader.deserialize::<HashMap<String, String>>().enumerate() {
            match Self::from_record(&record?) {
                Ok(metadata) => studies.push(metadata),
                Err(err) => warn!(row, %err, "skipping metadata row"),
            }
        }
        Ok(studies)
    }
}
