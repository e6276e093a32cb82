use std::fmt;

use serde::{Deserialize, Serialize};

/// The MR sequences acquired per study.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityType {
    CorPdf,
    CorT1,
    TraPdf,
    SagT2,
}

impl ModalityType {
    pub const ALL: [ModalityType; 4] = [
        ModalityType::CorPdf,
        ModalityType::CorT1,
        ModalityType::TraPdf,
        ModalityType::SagT2,
    ];

    /// Position of the modality inside per-modality tables.
    pub const fn index(self) -> usize {
        match self {
            ModalityType::CorPdf => 0,
            ModalityType::CorT1 => 1,
            ModalityType::TraPdf => 2,
            ModalityType::SagT2 => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ModalityType::CorPdf => "cor_pdf",
            ModalityType::CorT1 => "cor_t1",
            ModalityType::TraPdf => "tra_pdf",
            ModalityType::SagT2 => "sag_t2",
        }
    }

    /// Name of the landmark annotation file exported for this sequence, if
    /// the sequence is annotated at all.
    pub const fn annotation_file(self) -> Option<&'static str> {
        match self {
            ModalityType::CorPdf => None,
            ModalityType::CorT1 => Some("cort1_annotations.json"),
            ModalityType::TraPdf => Some("trapdf_annotations.json"),
            ModalityType::SagT2 => Some("sagt2_annotations.json"),
        }
    }
}

impl fmt::Display for ModalityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMethod {
    /// Forward projection of every target voxel through patient space.
    #[default]
    Dense,
    /// Affine fit on corresponding anatomical landmarks.
    Landmark,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_distinct_and_dense() {
        let mut seen = [false; 4];
        for modality in ModalityType::ALL {
            seen[modality.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn serde_names_match_display() {
        for modality in ModalityType::ALL {
            let json = serde_json::to_string(&modality).unwrap();
            assert_eq!(json, format!("\"{modality}\""));
        }
    }
}
