use std::{collections::HashMap, fmt, fs, path::Path};

use nalgebra::Vector3;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LandmarkError {
    #[error("No markups found in JSON object")]
    NoMarkups,

    #[error("No control points found in JSON object")]
    NoControlPoints,

    #[error("Missing required control points: {}", .0.join(", "))]
    MissingLabels(Vec<&'static str>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The anatomical landmarks annotated in every sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Landmark {
    LateralAcromionBorder,
    LateralClavicleBorder,
    ApicalHumerus,
    SuperiorLateralGlenoid,
    InferiorLateralGlenoid,
    CoracoidProcessTip,
}

impl Landmark {
    pub const ALL: [Landmark; 6] = [
        Landmark::LateralAcromionBorder,
        Landmark::LateralClavicleBorder,
        Landmark::ApicalHumerus,
        Landmark::SuperiorLateralGlenoid,
        Landmark::InferiorLateralGlenoid,
        Landmark::CoracoidProcessTip,
    ];

    /// Control point label used in the annotation files.
    pub const fn label(self) -> &'static str {
        match self {
            Landmark::LateralAcromionBorder => "lat_acr_border",
            Landmark::LateralClavicleBorder => "lat_clav_border",
            Landmark::ApicalHumerus => "apical_humerus",
            Landmark::SuperiorLateralGlenoid => "lat_glen_sup",
            Landmark::InferiorLateralGlenoid => "lat_glen_inf",
            Landmark::CoracoidProcessTip => "proc_cora_tip",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Deserialize)]
struct MarkupsFile {
    #[serde(default)]
    markups: Vec<Markup>,
}

#[derive(Deserialize)]
struct Markup {
    #[serde(default, rename = "controlPoints")]
    control_points: Vec<ControlPoint>,
}

#[derive(Deserialize)]
struct ControlPoint {
    label: Option<String>,
    position: Option<[f64; 3]>,
}

/// Patient space positions (mm) of all six landmarks in one sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferencePoints {
    points: [Vector3<f64>; 6],
}

impl ReferencePoints {
    /// Build from positions given in [`Landmark::ALL`] order.
    pub fn new(points: [Vector3<f64>; 6]) -> Self {
        Self { points }
    }

    pub fn get(&self, landmark: Landmark) -> Vector3<f64> {
        self.points[landmark.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Landmark, Vector3<f64>)> + '_ {
        Landmark::ALL.into_iter().zip(self.points.iter().copied())
    }

    /// Read a markups JSON file: `markups[0].controlPoints[]` with `label`
    /// and `position` entries.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, LandmarkError> {
        Self::load_from_json(&fs::read_to_string(path)?)
    }

    pub fn load_from_json(json: &str) -> Result<Self, LandmarkError> {
        let file: MarkupsFile = serde_json::from_str(json)?;
        let markup = file.markups.into_iter().next().ok_or(LandmarkError::NoMarkups)?;
        if markup.control_points.is_empty() {
            return Err(LandmarkError::NoControlPoints);
        }

        let by_label: HashMap<String, [f64; 3]> = markup
            .control_points
            .into_iter()
            .filter_map(|point| match (point.label, point.position) {
                (Some(label), Some(position)) if !label.is_empty() => Some((label, position)),
                _ => None,
            })
            .collect();

        let missing: Vec<&'static str> = Landmark::ALL
            .iter()
            .map(|landmark| landmark.label())
            .filter(|label| !by_label.contains_key(*label))
            .collect();
        if !missing.is_empty() {
            return Err(LandmarkError::MissingLabels(missing));
        }

        Ok(Self::new(
            Landmark::ALL.map(|landmark| Vector3::from(by_label[landmark.label()])),
        ))
    }
}
