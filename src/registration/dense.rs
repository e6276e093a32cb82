use super::{Label, RegistrationError, Registrar, count_foreground, fill_volume};
use crate::enums::ModalityType;
use crate::geometry::{VolumeGeometry, round_into_range};
use crate::study::Study;

use ndarray::Array3;
use tracing::{debug, info};

/// Resamples by projecting every target voxel through patient space into the
/// source grid and copying the nearest source label.
#[derive(Clone, Copy, Debug)]
pub struct VoxelProjectionRegistrar {
    pub parallel: bool,
}

impl Default for VoxelProjectionRegistrar {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl VoxelProjectionRegistrar {
    /// Resample `labels`, laid out on the `source` grid, onto the `target`
    /// grid. The output has shape `target.dim`; voxels whose rounded source
    /// index falls outside `labels` stay background.
    pub fn resample<T: Label>(
        &self,
        labels: &Array3<T>,
        source: &VolumeGeometry,
        target: &VolumeGeometry,
    ) -> Array3<T> {
        let (columns, rows, slices) = labels.dim();
        fill_volume(target.dim, self.parallel, |(column, row, slice)| {
            let position = target.patient_position(column as f64, row as f64, slice as f64);
            let index = source.continuous_index(&position);
            match (
                round_into_range(index.x, columns),
                round_into_range(index.y, rows),
                round_into_range(index.z, slices),
            ) {
                (Some(c), Some(r), Some(s)) => labels[[c, r, s]],
                _ => T::default(),
            }
        })
    }
}

impl Registrar for VoxelProjectionRegistrar {
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

        let source_geometry = study.series(native)?.geometry()?;
        let target_geometry = study.series(target)?.geometry()?;
        debug!(
            source_spacing = ?(
                source_geometry.row_spacing,
                source_geometry.column_spacing,
                source_geometry.slice_spacing
            ),
            target_spacing = ?(
                target_geometry.row_spacing,
                target_geometry.column_spacing,
                target_geometry.slice_spacing
            ),
            target_dim = ?target_geometry.dim,
            "resampling segmentation by voxel projection"
        );

        let registered = self.resample(labels, &source_geometry, &target_geometry);
        info!(
            source = %native,
            target = %target,
            foreground = count_foreground(&registered),
            total = registered.len(),
            "voxel projection registration complete"
        );
        Ok(registered)
    }
}
