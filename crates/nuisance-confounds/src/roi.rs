// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Region construction: tissue-probability map to binary ROI.

1. **Threshold**: a voxel is in the region when its probability is at least
   the threshold.
2. **Region erosion**: by a physical distance (`floor(mm / max_zoom)`
   iterations) or until a proportion of the voxels remains.
3. **Mask erosion**: the boundary mask is eroded with its own parameter
   (at least one iteration for a positive distance) and intersected with the
   region.

Any step leaving zero voxels fails with [`ConfoundError::EmptyRegion`].
*/

use crate::error::{Component, ConfoundError, ConfoundResult, RegionStep};
use crate::morphology::{binary_erosion, count, erode_to_proportion, iterations_for_distance};
use ndarray::{Array3, Zip};
use nuisance_config::{BranchErosion, Connectivity, Erosion, RoiConfig};
use nuisance_structures::{BinaryMask, ProbabilityMap, Roi, AFFINE_TOLERANCE};
use tracing::debug;

/// Parameters for [`build_roi`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiParams {
    pub threshold: f64,
    pub region_erosion: Erosion,
    pub mask_erosion: Erosion,
    pub connectivity: Connectivity,
}

impl Default for RoiParams {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            region_erosion: Erosion::None,
            mask_erosion: Erosion::None,
            connectivity: Connectivity::Six,
        }
    }
}

impl RoiParams {
    /// Parameters for one tissue branch of the configuration
    pub fn from_config(roi: &RoiConfig, branch: &BranchErosion) -> Self {
        Self {
            threshold: roi.threshold,
            region_erosion: branch.region,
            mask_erosion: branch.mask,
            connectivity: roi.connectivity,
        }
    }

    fn validate(&self, tissue: &str) -> ConfoundResult<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfoundError::invalid(
                Component::RegionBuilder,
                tissue,
                format!("threshold must be in (0, 1], got {}", self.threshold),
            ));
        }
        for erosion in [self.region_erosion, self.mask_erosion] {
            match erosion {
                Erosion::Millimeters(mm) if !(mm.is_finite() && mm >= 0.0) => {
                    return Err(ConfoundError::invalid(
                        Component::RegionBuilder,
                        tissue,
                        format!("erosion distance must be >= 0 mm, got {}", mm),
                    ))
                }
                Erosion::Proportion(p) if !(p > 0.0 && p <= 1.0) => {
                    return Err(ConfoundError::invalid(
                        Component::RegionBuilder,
                        tissue,
                        format!("erosion proportion must be in (0, 1], got {}", p),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Build the ROI for `tpm`, named after it.
///
/// `mask` must share the map's grid (shape and affine).
pub fn build_roi(
    tpm: &ProbabilityMap,
    mask: &BinaryMask,
    params: &RoiParams,
) -> ConfoundResult<Roi> {
    let tissue = tpm.name();
    params.validate(tissue)?;
    if tpm.shape() != mask.shape() {
        return Err(ConfoundError::ShapeMismatch {
            component: Component::RegionBuilder,
            input: tissue.to_string(),
            reason: format!(
                "probability map shape {:?} differs from mask shape {:?}",
                tpm.shape(),
                mask.shape()
            ),
        });
    }
    if !tpm.affine().approx_eq(mask.affine(), AFFINE_TOLERANCE) {
        return Err(ConfoundError::ShapeMismatch {
            component: Component::RegionBuilder,
            input: tissue.to_string(),
            reason: "probability map and mask affines differ".to_string(),
        });
    }

    let zooms = tpm.affine().zooms();
    let empty = |erosion: Erosion, step: RegionStep| ConfoundError::EmptyRegion {
        tissue: tissue.to_string(),
        erosion,
        step,
    };

    let threshold = params.threshold;
    let region: Array3<bool> = tpm.probabilities().mapv(|p| p >= threshold);
    let thresholded = count(&region);
    if thresholded == 0 {
        return Err(empty(Erosion::None, RegionStep::Threshold));
    }

    let region = match params.region_erosion {
        Erosion::None => region,
        Erosion::Millimeters(mm) => binary_erosion(
            &region,
            params.connectivity,
            iterations_for_distance(mm, zooms),
        ),
        Erosion::Proportion(p) => erode_to_proportion(&region, params.connectivity, p),
    };
    let eroded = count(&region);
    if eroded == 0 {
        return Err(empty(params.region_erosion, RegionStep::RegionErosion));
    }

    let boundary = match params.mask_erosion {
        Erosion::None => mask.mask().clone(),
        Erosion::Millimeters(mm) if mm > 0.0 => binary_erosion(
            mask.mask(),
            params.connectivity,
            iterations_for_distance(mm, zooms).max(1),
        ),
        Erosion::Millimeters(_) => mask.mask().clone(),
        Erosion::Proportion(p) => erode_to_proportion(mask.mask(), params.connectivity, p),
    };

    let mut region = region;
    Zip::from(&mut region)
        .and(&boundary)
        .for_each(|voxel, &inside| *voxel = *voxel && inside);
    let final_count = count(&region);
    if final_count == 0 {
        return Err(empty(params.mask_erosion, RegionStep::MaskIntersection));
    }

    debug!(
        target: "nuisance-confounds",
        "[ROI] {}: {} voxels above {} -> {} after region erosion ({}) -> {} inside mask (erosion {})",
        tissue,
        thresholded,
        threshold,
        eroded,
        params.region_erosion,
        final_count,
        params.mask_erosion
    );

    Ok(Roi::new(tissue, BinaryMask::new(region, *tpm.affine())))
}
