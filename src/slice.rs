use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use nalgebra::Vector3;
use ndarray::{Array2, s};

/// Modality value of DICOM segmentation objects.
pub const SEGMENTATION_MODALITY: &str = "SEG";

/// The geometry and identification tags of one image plane.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SliceHeader {
    pub image_position_patient: Option<[f64; 3]>,
    /// Row direction cosines followed by column direction cosines.
    pub image_orientation_patient: Option<[f64; 6]>,
    /// Spacing between rows followed by spacing between columns, in mm.
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub patient_id: Option<String>,
    pub modality: Option<String>,
}

impl SliceHeader {
    /// Read the header tags from a DICOM object. Missing or malformed tags
    /// are left empty, validation happens when slices are assembled into a
    /// series.
    pub fn from_object(dicom_object: &InMemDicomObject) -> Self {
        Self {
            image_position_patient: element_floats(dicom_object, tags::IMAGE_POSITION_PATIENT),
            image_orientation_patient: element_floats(
                dicom_object,
                tags::IMAGE_ORIENTATION_PATIENT,
            ),
            pixel_spacing: element_floats(dicom_object, tags::PIXEL_SPACING),
            slice_thickness: element_float(dicom_object, tags::SLICE_THICKNESS),
            spacing_between_slices: element_float(dicom_object, tags::SPACING_BETWEEN_SLICES),
            study_instance_uid: element_string(dicom_object, tags::STUDY_INSTANCE_UID)
                .unwrap_or_default(),
            series_instance_uid: element_string(dicom_object, tags::SERIES_INSTANCE_UID)
                .unwrap_or_default(),
            sop_instance_uid: element_string(dicom_object, tags::SOP_INSTANCE_UID)
                .unwrap_or_default(),
            patient_id: element_string(dicom_object, tags::PATIENT_ID),
            modality: element_string(dicom_object, tags::MODALITY),
        }
    }

    pub fn is_segmentation(&self) -> bool {
        self.modality.as_deref() == Some(SEGMENTATION_MODALITY)
    }

    pub fn position(&self) -> Option<Vector3<f64>> {
        self.image_position_patient.map(Vector3::from)
    }

    /// Row and column direction cosines.
    pub fn direction_cosines(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        self.image_orientation_patient.map(|iop| {
            (
                Vector3::new(iop[0], iop[1], iop[2]),
                Vector3::new(iop[3], iop[4], iop[5]),
            )
        })
    }
}

pub(crate) fn element_floats<const N: usize>(
    dicom_object: &InMemDicomObject,
    tag: Tag,
) -> Option<[f64; N]> {
    let values = dicom_object.element(tag).ok()?.to_multi_float64().ok()?;
    values.get(..N)?.try_into().ok()
}

pub(crate) fn element_float(dicom_object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    dicom_object.element(tag).ok()?.to_float64().ok()
}

/// Trimmed string value of an element, `None` if absent or empty.
pub(crate) fn element_string(dicom_object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// A single image plane: its header and the first frame of its pixel data.
#[derive(Clone, Debug, PartialEq)]
pub struct Slice {
    pub header: SliceHeader,
    pub pixels: Array2<u16>,
}

impl Slice {
    pub fn new(header: SliceHeader, pixels: Array2<u16>) -> Self {
        Self { header, pixels }
    }

    /// Read the header and decode the pixel data of a DICOM file. Stored
    /// values are kept as-is, no modality LUT is applied.
    pub fn from_dicom_object(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<Self, dicom::pixeldata::Error> {
        let header = SliceHeader::from_object(dicom_object);
        let pixel_data = dicom_object.decode_pixel_data()?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        let pixels = pixel_data
            .to_ndarray_with_options::<u16>(&options)?
            .slice_move(s![0, .., .., 0]);
        Ok(Self { header, pixels })
    }

    /// (rows, columns)
    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }
}
