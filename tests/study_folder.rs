use std::{fs, path::Path};

use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_coreg::{
    Landmark, LandmarkAffineRegistrar, ModalityType, Registrar, SeriesLoader, Study,
    StudyMetadata, VoxelProjectionRegistrar, study::StudyError,
};
use dicom_dictionary_std::tags;
use ndarray::Array3;

const SIZE: usize = 4;
const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
const STUDY_UID: &str = "1.2.3";

fn pixel(slice: usize, row: usize, column: usize) -> u16 {
    (100 * slice + 10 * row + column) as u16
}

/// Write one axial slice with 1 mm pixels at `z = slice`.
fn write_slice(path: &Path, series_uid: &str, origin_x: f64, slice: usize) {
    let instance_uid = format!("{series_uid}.{}", slice + 1);
    let pixels: Vec<u16> = (0..SIZE * SIZE)
        .map(|i| pixel(slice, i / SIZE, i % SIZE))
        .collect();
    let position = [origin_x.to_string(), "0".to_string(), slice.to_string()];

    let object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(MR_IMAGE_STORAGE)),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(instance_uid.as_str()),
        ),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(STUDY_UID)),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P1")),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            PrimitiveValue::Strs(position.into_iter().collect()),
        ),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            dicom_value!(Strs, ["1", "0", "0", "0", "1", "0"]),
        ),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(Strs, ["1", "1"])),
        DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from("1")),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(SIZE as u16)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(SIZE as u16)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.into())),
    ]);

    object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(MR_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(instance_uid.as_str()),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
}

fn write_series(folder: &Path, series_uid: &str, origin_x: f64) {
    let directory = folder.join(series_uid);
    fs::create_dir_all(&directory).unwrap();
    // names in reverse slice order, the loader must not rely on them
    for slice in 0..SIZE {
        write_slice(
            &directory.join(format!("IM{}", SIZE - slice)),
            series_uid,
            origin_x,
            slice,
        );
    }
    fs::write(directory.join("DICOMDIR.txt"), b"not a DICOM file").unwrap();
}

fn labels() -> Array3<u16> {
    Array3::from_shape_fn((SIZE, SIZE, SIZE), |(c, r, s)| {
        (1 + c + SIZE * r + SIZE * SIZE * s) as u16
    })
}

/// Raw little endian label map, first axis fastest.
fn write_segmentation(folder: &Path) {
    let labels = labels();
    let mut bytes = format!(
        "NRRD0004\n# http://teem.sourceforge.net/nrrd/format.html\n\
         type: unsigned short\ndimension: 3\nspace: left-posterior-superior\n\
         sizes: {SIZE} {SIZE} {SIZE}\n\
         space directions: (1,0,0) (0,1,0) (0,0,1)\n\
         kinds: domain domain domain\nendian: little\nencoding: raw\n\
         space origin: (0,0,0)\n\n"
    )
    .into_bytes();
    for s in 0..SIZE {
        for r in 0..SIZE {
            for c in 0..SIZE {
                bytes.extend(labels[[c, r, s]].to_le_bytes());
            }
        }
    }
    fs::write(folder.join("segmentation.seg.nrrd"), bytes).unwrap();
}

fn write_annotations(path: &Path) {
    let positions = [
        [1.5, 0.5, 0.2],
        [3.5, 0.5, 0.2],
        [1.5, 2.5, 0.2],
        [1.5, 0.5, 2.2],
        [3.5, 3.5, 1.2],
        [2.5, 1.5, 3.2],
    ];
    let control_points: Vec<String> = Landmark::ALL
        .iter()
        .zip(positions)
        .enumerate()
        .map(|(i, (landmark, [x, y, z]))| {
            format!(
                r#"{{"id": "{}", "label": "{}", "position": [{x}, {y}, {z}]}}"#,
                i + 1,
                landmark.label()
            )
        })
        .collect();
    let json = format!(
        r#"{{"@schema": "https://raw.githubusercontent.com/slicer/slicer/master/Modules/Loadable/Markups/Resources/Schema/markups-schema-v1.0.3.json#",
            "markups": [{{"type": "Fiducial", "coordinateSystem": "LPS", "controlPoints": [{}]}}]}}"#,
        control_points.join(", ")
    );
    fs::write(path, json).unwrap();
}

/// Coronal T1 series at the patient origin, transversal PD series shifted by
/// 1 mm along x, no sagittal T2 series.
fn write_study(folder: &Path) -> StudyMetadata {
    write_series(folder, "1.2.3.1", 0.0);
    write_series(folder, "1.2.3.2", 1.0);
    write_segmentation(folder);
    for file in ["cort1_annotations.json", "trapdf_annotations.json", "sagt2_annotations.json"] {
        write_annotations(&folder.join(file));
    }

    let mut metadata = StudyMetadata::new(STUDY_UID);
    metadata.series_mut(ModalityType::CorT1).series_uid = Some("1.2.3.1".to_string());
    metadata.series_mut(ModalityType::TraPdf).series_uid = Some("1.2.3.2".to_string());
    metadata
}

#[test]
fn loads_series_from_directory_in_patient_order() {
    let folder = tempfile::tempdir().unwrap();
    write_series(folder.path(), "1.2.3.1", 0.0);

    let series = SeriesLoader::load_from_directory(folder.path().join("1.2.3.1")).unwrap();
    assert_eq!(series.shape(), (SIZE, SIZE, SIZE));
    assert_eq!(series.series_uid(), Some("1.2.3.1"));
    assert_eq!(series.study_uid(), Some(STUDY_UID));
    assert!(series.is_sorted().unwrap());
    for (index, slice) in series.slices().iter().enumerate() {
        assert_eq!(slice.header.image_position_patient, Some([0.0, 0.0, index as f64]));
        assert_eq!(slice.pixels[[2, 3]], pixel(index, 2, 3));
    }
    assert_eq!(series.slice_spacing().unwrap(), 1.0);
}

#[test]
fn study_folder_registers_onto_shifted_series() {
    let folder = tempfile::tempdir().unwrap();
    let metadata = write_study(folder.path());

    let study = Study::load_from_folder(folder.path(), &metadata).unwrap();
    assert_eq!(study.native_modality(), ModalityType::CorT1);
    assert_eq!(study.segmentation().labels(), &labels());
    assert!(study.reference_points(ModalityType::SagT2).is_some());
    assert!(!study.is_series_loaded(ModalityType::TraPdf));

    let dense = VoxelProjectionRegistrar::default()
        .register(&study, ModalityType::TraPdf)
        .unwrap();
    assert!(study.is_series_loaded(ModalityType::TraPdf));
    let by_landmarks = LandmarkAffineRegistrar::default()
        .register(&study, ModalityType::TraPdf)
        .unwrap();
    assert_eq!(dense, by_landmarks);

    let source = labels();
    for ((c, r, s), &label) in dense.indexed_iter() {
        let expected = if c + 1 < SIZE { source[[c + 1, r, s]] } else { 0 };
        assert_eq!(label, expected, "voxel ({c}, {r}, {s})");
    }

    // no sagittal series is listed for this study
    assert!(matches!(
        study.series(ModalityType::SagT2),
        Err(StudyError::MissingSeriesPath(ModalityType::SagT2))
    ));
}

#[test]
fn listed_series_folder_must_exist() {
    let folder = tempfile::tempdir().unwrap();
    let mut metadata = write_study(folder.path());
    metadata.series_mut(ModalityType::SagT2).series_uid = Some("1.2.3.9".to_string());

    assert!(matches!(
        Study::load_from_folder(folder.path(), &metadata),
        Err(StudyError::SeriesFolderNotFound { modality: ModalityType::SagT2, .. })
    ));
}

#[test]
fn missing_annotations_fail_the_study() {
    let folder = tempfile::tempdir().unwrap();
    let metadata = write_study(folder.path());
    fs::remove_file(folder.path().join("trapdf_annotations.json")).unwrap();

    assert!(matches!(
        Study::load_from_folder(folder.path(), &metadata),
        Err(StudyError::Landmarks { modality: ModalityType::TraPdf, .. })
    ));
}
