use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::RegistrationMethod;
use crate::registration::{LandmarkAffineRegistrar, Registrar, VoxelProjectionRegistrar};

/// Fewest landmark pairs that determine a 3D affine transform.
pub const MIN_AFFINE_LANDMARKS: usize = 4;

pub const DEFAULT_MAX_LANDMARK_DISTANCE_MM: f64 = 5.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_landmark_distance_mm must be positive, got {0}")]
    InvalidDistance(f64),

    #[error("min_landmarks must be at least {MIN_AFFINE_LANDMARKS}, got {0}")]
    TooFewLandmarks(usize),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub method: RegistrationMethod,
    /// Landmark pairs further apart than this in patient space are dropped.
    pub max_landmark_distance_mm: f64,
    pub min_landmarks: usize,
    /// Resample target voxels on the rayon thread pool.
    pub parallel: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            method: RegistrationMethod::default(),
            max_landmark_distance_mm: DEFAULT_MAX_LANDMARK_DISTANCE_MM,
            min_landmarks: MIN_AFFINE_LANDMARKS,
            parallel: true,
        }
    }
}

impl RegistrationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_landmark_distance_mm.is_nan() || self.max_landmark_distance_mm <= 0.0 {
            return Err(ConfigError::InvalidDistance(self.max_landmark_distance_mm));
        }
        if self.min_landmarks < MIN_AFFINE_LANDMARKS {
            return Err(ConfigError::TooFewLandmarks(self.min_landmarks));
        }
        Ok(())
    }

    /// The registrar selected by `method`.
    pub fn registrar(&self) -> Box<dyn Registrar> {
        match self.method {
            RegistrationMethod::Dense => Box::new(VoxelProjectionRegistrar {
                parallel: self.parallel,
            }),
            RegistrationMethod::Landmark => Box::new(LandmarkAffineRegistrar {
                max_distance_mm: self.max_landmark_distance_mm,
                min_landmarks: self.min_landmarks,
                parallel: self.parallel,
            }),
        }
    }
}
