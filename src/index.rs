//! Study index of DICOM archives.
//!
//! Every root directory is scanned on its own rayon worker; the per-root maps
//! are then folded in the order the roots were given, so the result does not
//! depend on scheduling.

use std::{
    collections::BTreeMap,
    fs,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::slice::{element_float, element_floats, element_string};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Could not scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub file_path: PathBuf,
    pub instance_uid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_instance_uid: String,
    pub series_description: Option<String>,
    pub orientation: Option<[f64; 6]>,
    pub instances: Vec<InstanceRecord>,
}

impl SeriesRecord {
    /// Fill missing fields from `other` and add its instances that are not
    /// indexed yet.
    pub fn merge(&mut self, other: SeriesRecord) {
        self.series_description = self.series_description.take().or(other.series_description);
        self.orientation = self.orientation.or(other.orientation);
        for instance in other.instances {
            if !self
                .instances
                .iter()
                .any(|known| known.instance_uid == instance.instance_uid)
            {
                self.instances.push(instance);
            }
        }
    }
}

/// Descriptive tags of one study, gathered from all of its files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    /// Root directory the study was first found in.
    pub source: PathBuf,
    pub study_instance_uid: String,
    pub study_date: Option<String>,
    pub study_description: Option<String>,
    pub institution_name: Option<String>,
    pub laterality: Option<String>,
    pub magnetic_field_strength: Option<f64>,
    pub manufacturer: Option<String>,
    pub manufacturer_model_name: Option<String>,
    pub patient_age: Option<String>,
    pub patient_id: Option<String>,
    pub patient_sex: Option<String>,
    pub patient_weight: Option<f64>,
    /// Some series of the study was acquired with contrast agent.
    pub with_contrast: bool,
    pub series: BTreeMap<String, SeriesRecord>,
}

impl StudyRecord {
    /// Describe the study from the header of one of its files, `None` if the
    /// file lacks the study or series instance UID.
    pub fn from_header(
        source: &Path,
        file_path: &Path,
        dicom_object: &InMemDicomObject,
    ) -> Option<Self> {
        let study_instance_uid = element_string(dicom_object, tags::STUDY_INSTANCE_UID)?;
        let series_instance_uid = element_string(dicom_object, tags::SERIES_INSTANCE_UID)?;
        let series_description = element_string(dicom_object, tags::SERIES_DESCRIPTION);

        let mut instances = Vec::new();
        if let Some(instance_uid) = element_string(dicom_object, tags::SOP_INSTANCE_UID) {
            instances.push(InstanceRecord {
                file_path: file_path.to_path_buf(),
                instance_uid,
            });
        }

        let series = SeriesRecord {
            series_instance_uid: series_instance_uid.clone(),
            series_description,
            orientation: element_floats(dicom_object, tags::IMAGE_ORIENTATION_PATIENT),
            instances,
        };

        Some(Self {
            source: source.to_path_buf(),
            study_instance_uid,
            study_date: element_string(dicom_object, tags::STUDY_DATE),
            study_description: element_string(dicom_object, tags::STUDY_DESCRIPTION),
            institution_name: element_string(dicom_object, tags::INSTITUTION_NAME),
            laterality: element_string(dicom_object, tags::LATERALITY),
            magnetic_field_strength: element_float(dicom_object, tags::MAGNETIC_FIELD_STRENGTH),
            manufacturer: element_string(dicom_object, tags::MANUFACTURER),
            manufacturer_model_name: element_string(dicom_object, tags::MANUFACTURER_MODEL_NAME),
            patient_age: element_string(dicom_object, tags::PATIENT_AGE),
            patient_id: element_string(dicom_object, tags::PATIENT_ID),
            patient_sex: element_string(dicom_object, tags::PATIENT_SEX),
            patient_weight: element_float(dicom_object, tags::PATIENT_WEIGHT),
            with_contrast: series
                .series_description
                .as_deref()
                .is_some_and(describes_contrast),
            series: BTreeMap::from([(series_instance_uid, series)]),
        })
    }

    /// Fold `other` into this record. Fields already set are kept, missing
    /// ones are taken from `other`; series and instances are unioned.
    pub fn merge(&mut self, other: StudyRecord) {
        fn fill<T>(field: &mut Option<T>, other: Option<T>) {
            if field.is_none() {
                *field = other;
            }
        }

        fill(&mut self.study_date, other.study_date);
        fill(&mut self.study_description, other.study_description);
        fill(&mut self.institution_name, other.institution_name);
        fill(&mut self.laterality, other.laterality);
        fill(&mut self.magnetic_field_strength, other.magnetic_field_strength);
        fill(&mut self.manufacturer, other.manufacturer);
        fill(&mut self.manufacturer_model_name, other.manufacturer_model_name);
        fill(&mut self.patient_age, other.patient_age);
        fill(&mut self.patient_id, other.patient_id);
        fill(&mut self.patient_sex, other.patient_sex);
        fill(&mut self.patient_weight, other.patient_weight);
        self.with_contrast |= other.with_contrast;

        for (uid, series) in other.series {
            match self.series.get_mut(&uid) {
                Some(known) => known.merge(series),
                None => {
                    self.series.insert(uid, series);
                }
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.series.values().map(|series| series.instances.len()).sum()
    }
}

/// Contrast enhanced sequences carry "KM" (Kontrastmittel) in their
/// description.
fn describes_contrast(series_description: &str) -> bool {
    series_description.to_ascii_lowercase().contains("km")
}

pub type StudyMap = BTreeMap<String, StudyRecord>;

fn merge_into(map: &mut StudyMap, record: StudyRecord) {
    match map.get_mut(&record.study_instance_uid) {
        Some(known) => known.merge(record),
        None => {
            map.insert(record.study_instance_uid.clone(), record);
        }
    }
}

fn collect_files(directory: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Index every DICOM file below `root`, in path order. Files that cannot be
/// read as DICOM are skipped.
pub fn scan_root(root: &Path) -> Result<StudyMap, IndexError> {
    let mut files = Vec::new();
    collect_files(root, &mut files).map_err(|source| IndexError::Scan {
        path: root.to_path_buf(),
        source,
    })?;

    let mut map = StudyMap::new();
    for file in &files {
        let header = match OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(file)
        {
            Ok(header) => header,
            Err(err) => {
                warn!(file = %file.display(), %err, "skipping file that is not DICOM");
                continue;
            }
        };
        match StudyRecord::from_header(root, file, &header) {
            Some(record) => merge_into(&mut map, record),
            None => warn!(file = %file.display(), "skipping file without study or series UID"),
        }
    }

    debug!(
        root = %root.display(),
        files = files.len(),
        studies = map.len(),
        "scanned archive root"
    );
    Ok(map)
}

/// Build the study index of several archive roots.
///
/// Roots are scanned in parallel and merged in input order: for a study found
/// under several roots the earlier root's fields win, fields it lacks are
/// filled from later roots.
pub fn build_study_map(roots: &[impl AsRef<Path> + Sync]) -> Result<StudyMap, IndexError> {
    let per_root = roots
        .par_iter()
        .map(|root| scan_root(root.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = StudyMap::new();
    for root_map in per_root {
        for record in root_map.into_values() {
            merge_into(&mut map, record);
        }
    }

    info!(roots = roots.len(), studies = map.len(), "built study index");
    Ok(map)
}

pub fn write_study_map(map: &StudyMap, path: impl AsRef<Path>) -> Result<(), IndexError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, map)?;
    writer.flush()?;
    Ok(())
}

pub fn read_study_map(path: impl AsRef<Path>) -> Result<StudyMap, IndexError> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
    use dicom::object::FileMetaTableBuilder;

    const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
    const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

    struct Header<'a> {
        study: &'a str,
        series: &'a str,
        instance: &'a str,
        description: &'a str,
        manufacturer: Option<&'a str>,
        institution: Option<&'a str>,
    }

    fn write_header(path: &Path, header: Header) {
        let mut elements = vec![
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(MR_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(header.instance)),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(header.study)),
            DataElement::new(
                tags::SERIES_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from(header.series),
            ),
            DataElement::new(
                tags::SERIES_DESCRIPTION,
                VR::LO,
                PrimitiveValue::from(header.description),
            ),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                dicom_value!(Strs, ["1", "0", "0", "0", "1", "0"]),
            ),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P1")),
        ];
        if let Some(manufacturer) = header.manufacturer {
            elements.push(DataElement::new(
                tags::MANUFACTURER,
                VR::LO,
                PrimitiveValue::from(manufacturer),
            ));
        }
        if let Some(institution) = header.institution {
            elements.push(DataElement::new(
                tags::INSTITUTION_NAME,
                VR::LO,
                PrimitiveValue::from(institution),
            ));
        }

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        InMemDicomObject::from_element_iter(elements)
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(MR_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(header.instance),
            )
            .unwrap()
            .write_to_file(path)
            .unwrap();
    }

    #[test]
    fn contrast_is_detected_case_insensitively() {
        assert!(describes_contrast("t1_tse_cor KM"));
        assert!(describes_contrast("PD fs km"));
        assert!(!describes_contrast("t2_tse_sag"));
    }

    #[test]
    fn scans_nested_directories_and_skips_other_files() {
        let root = tempfile::tempdir().unwrap();
        write_header(
            &root.path().join("a/series1/1.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.1",
                instance: "1.2.3.1.1",
                description: "t1_tse_cor",
                manufacturer: None,
                institution: Some("Clinic"),
            },
        );
        write_header(
            &root.path().join("a/series1/2.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.1",
                instance: "1.2.3.1.2",
                description: "t1_tse_cor",
                manufacturer: Some("GE"),
                institution: None,
            },
        );
        write_header(
            &root.path().join("b/1.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.2",
                instance: "1.2.3.2.1",
                description: "pd_tse_tra KM",
                manufacturer: Some("Siemens"),
                institution: None,
            },
        );
        fs::write(root.path().join("a/README"), b"not dicom").unwrap();

        let map = scan_root(root.path()).unwrap();
        assert_eq!(map.len(), 1);
        let study = &map["1.2.3"];
        assert_eq!(study.source, root.path());
        assert_eq!(study.series.len(), 2);
        assert_eq!(study.instance_count(), 3);
        assert_eq!(study.institution_name.as_deref(), Some("Clinic"));
        // first file in path order without a manufacturer, filled from the next
        assert_eq!(study.manufacturer.as_deref(), Some("GE"));
        assert!(study.with_contrast);
        assert_eq!(
            study.series["1.2.3.1"].orientation,
            Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
        );
    }

    #[test]
    fn earlier_roots_win_when_merging() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_header(
            &first.path().join("1.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.1",
                instance: "1.2.3.1.1",
                description: "t1",
                manufacturer: Some("GE"),
                institution: None,
            },
        );
        write_header(
            &second.path().join("1.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.1",
                instance: "1.2.3.1.1",
                description: "t1",
                manufacturer: Some("Siemens"),
                institution: Some("Clinic"),
            },
        );
        write_header(
            &second.path().join("2.dcm"),
            Header {
                study: "1.2.3",
                series: "1.2.3.1",
                instance: "1.2.3.1.2",
                description: "t1",
                manufacturer: None,
                institution: None,
            },
        );

        for _ in 0..4 {
            let map = build_study_map(&[first.path(), second.path()]).unwrap();
            let study = &map["1.2.3"];
            assert_eq!(study.source, first.path());
            assert_eq!(study.manufacturer.as_deref(), Some("GE"));
            assert_eq!(study.institution_name.as_deref(), Some("Clinic"));
            assert!(!study.with_contrast);
            let instances: Vec<&str> = study.series["1.2.3.1"]
                .instances
                .iter()
                .map(|instance| instance.instance_uid.as_str())
                .collect();
            assert_eq!(instances, ["1.2.3.1.1", "1.2.3.1.2"]);
        }

        let reversed = build_study_map(&[second.path(), first.path()]).unwrap();
        assert_eq!(reversed["1.2.3"].manufacturer.as_deref(), Some("Siemens"));
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            build_study_map(&[dir.path().join("absent")]),
            Err(IndexError::Scan { .. })
        ));
    }

    #[test]
    fn index_survives_json() {
        let mut study = StudyRecord {
            study_instance_uid: "1.2.3".to_string(),
            patient_weight: Some(71.5),
            with_contrast: true,
            ..StudyRecord::default()
        };
        study.series.insert(
            "1.2.3.1".to_string(),
            SeriesRecord {
                series_instance_uid: "1.2.3.1".to_string(),
                ..SeriesRecord::default()
            },
        );
        let map = StudyMap::from([("1.2.3".to_string(), study)]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        write_study_map(&map, &path).unwrap();
        assert_eq!(read_study_map(&path).unwrap(), map);
    }
}
