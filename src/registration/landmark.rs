use super::{AffineTransform, Label, RegistrationError, Registrar, count_foreground};
use crate::config::{DEFAULT_MAX_LANDMARK_DISTANCE_MM, MIN_AFFINE_LANDMARKS};
use crate::coordinates::CoordinateMapper;
use crate::enums::ModalityType;
use crate::landmarks::{Landmark, ReferencePoints};
use crate::series::Series;
use crate::study::Study;

use nalgebra::Vector3;
use ndarray::Array3;
use tracing::{debug, info};

/// A landmark annotated in both the source and the target sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkPair {
    pub landmark: Landmark,
    pub source: Vector3<f64>,
    pub target: Vector3<f64>,
    /// Patient space distance between both annotations (mm).
    pub distance: f64,
}

/// Keep the landmark pairs whose annotations lie strictly closer than
/// `max_distance_mm` in patient space.
pub fn filter_landmarks(
    source: &ReferencePoints,
    target: &ReferencePoints,
    max_distance_mm: f64,
) -> Vec<LandmarkPair> {
    Landmark::ALL
        .into_iter()
        .filter_map(|landmark| {
            let pair = LandmarkPair {
                landmark,
                source: source.get(landmark),
                target: target.get(landmark),
                distance: (source.get(landmark) - target.get(landmark)).norm(),
            };
            let keep = pair.distance < max_distance_mm;
            debug!(
                landmark = %landmark,
                distance_mm = pair.distance,
                keep,
                "landmark distance"
            );
            keep.then_some(pair)
        })
        .collect()
}

/// Affine fit between two image grids and its per-landmark residuals (voxels).
#[derive(Clone, Debug)]
pub struct LandmarkFit {
    pub transform: AffineTransform,
    pub residuals: Vec<(Landmark, f64)>,
}

impl LandmarkFit {
    pub fn mean_error(&self) -> f64 {
        if self.residuals.is_empty() {
            return 0.0;
        }
        self.residuals.iter().map(|(_, e)| e).sum::<f64>() / self.residuals.len() as f64
    }

    pub fn max_error(&self) -> f64 {
        self.residuals.iter().map(|(_, e)| *e).fold(0.0, f64::max)
    }
}

/// Resamples through an affine transform between the source and target
/// image grids, fitted on anatomical landmarks annotated in both sequences.
#[derive(Clone, Copy, Debug)]
pub struct LandmarkAffineRegistrar {
    pub max_distance_mm: f64,
    pub min_landmarks: usize,
    pub parallel: bool,
}

impl Default for LandmarkAffineRegistrar {
    fn default() -> Self {
        Self {
            max_distance_mm: DEFAULT_MAX_LANDMARK_DISTANCE_MM,
            min_landmarks: MIN_AFFINE_LANDMARKS,
            parallel: true,
        }
    }
}

impl LandmarkAffineRegistrar {
    /// Fit the affine transform mapping source voxel indices to target voxel
    /// indices on the retained landmark pairs.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `min_landmarks` pairs are given, if a landmark
    /// cannot be mapped into its grid, or if the pairs do not determine the
    /// transform.
    pub fn fit(
        &self,
        pairs: &[LandmarkPair],
        source_series: &Series,
        target_series: &Series,
    ) -> Result<LandmarkFit, RegistrationError> {
        let required = self.min_landmarks.max(MIN_AFFINE_LANDMARKS);
        if pairs.len() < required {
            return Err(RegistrationError::InsufficientLandmarks {
                found: pairs.len(),
                required,
            });
        }

        let mut source_points = Vec::with_capacity(pairs.len());
        let mut target_points = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let source = CoordinateMapper::patient_to_image(&pair.source, source_series)?;
            let target = CoordinateMapper::patient_to_image(&pair.target, target_series)?;
            debug!(
                landmark = %pair.landmark,
                source = ?source.voxel_index(),
                target = ?target.voxel_index(),
                "landmark image coordinates"
            );
            source_points.push(source.voxel_index());
            target_points.push(target.voxel_index());
        }

        let transform = AffineTransform::estimate(&source_points, &target_points)?;
        let residuals = pairs
            .iter()
            .map(|pair| pair.landmark)
            .zip(transform.residuals(&source_points, &target_points))
            .collect();
        debug!(
            matrix = ?transform.matrix,
            offset = ?transform.offset,
            "estimated affine transform"
        );

        Ok(LandmarkFit {
            transform,
            residuals,
        })
    }

    /// Resample `labels` from the grid of `source_series` into the grid of
    /// `target_series` using the landmarks annotated in both.
    pub fn register_labels<T: Label>(
        &self,
        labels: &Array3<T>,
        source_series: &Series,
        target_series: &Series,
        source_points: &ReferencePoints,
        target_points: &ReferencePoints,
    ) -> Result<(Array3<T>, LandmarkFit), RegistrationError> {
        let pairs = filter_landmarks(source_points, target_points, self.max_distance_mm);
        let fit = self.fit(&pairs, source_series, target_series)?;
        for (landmark, error) in &fit.residuals {
            debug!(landmark = %landmark, error_voxels = error, "landmark alignment error");
        }
        info!(
            landmarks = pairs.len(),
            mean_error_voxels = fit.mean_error(),
            max_error_voxels = fit.max_error(),
            "landmark affine fit"
        );

        let inverse = fit.transform.inverse()?;
        let (slices, rows, columns) = target_series.shape();
        let registered = inverse.resample(labels, (columns, rows, slices), self.parallel);
        Ok((registered, fit))
    }
}

impl Registrar for LandmarkAffineRegistrar {
    fn register(
        &self,
        study: &Study,
        target: ModalityType,
    ) -> Result<Array3<u16>, RegistrationError> {
        let native = study.native_modality();
        let labels = study.segmentation().labels();
        if target == native {
            return Ok(labels.clone());
        }

        let source_points = study
            .reference_points(native)
            .ok_or(RegistrationError::MissingReferencePoints(native))?;
        let target_points = study
            .reference_points(target)
            .ok_or(RegistrationError::MissingReferencePoints(target))?;
        let source_series = study.series(native)?;
        let target_series = study.series(target)?;

        let (registered, _) = self.register_labels(
            labels,
            source_series,
            target_series,
            source_points,
            target_points,
        )?;
        info!(
            source = %native,
            target = %target,
            foreground = count_foreground(&registered),
            total = registered.len(),
            "landmark registration complete"
        );
        Ok(registered)
    }
}
