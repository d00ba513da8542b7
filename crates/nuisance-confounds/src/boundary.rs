// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Restricting a ROI to the brain (or any other boundary) mask.

use crate::error::{Component, ConfoundError, ConfoundResult};
use ndarray::Zip;
use nuisance_structures::{BinaryMask, Roi};
use tracing::debug;

/// Voxel-wise AND of `roi` and `boundary`. The result keeps the ROI's name
/// and carries the boundary's affine.
pub fn apply_mask(roi: &Roi, boundary: &BinaryMask) -> ConfoundResult<Roi> {
    if roi.shape() != boundary.shape() {
        return Err(ConfoundError::GridMismatch {
            component: Component::BoundaryMasker,
            input: roi.name().to_string(),
            reason: format!(
                "ROI shape {:?} differs from mask shape {:?}",
                roi.shape(),
                boundary.shape()
            ),
        });
    }

    let masked = Zip::from(roi.mask().mask())
        .and(boundary.mask())
        .map_collect(|&a, &b| a && b);
    let result = Roi::new(roi.name(), BinaryMask::new(masked, *boundary.affine()));
    debug!(
        target: "nuisance-confounds",
        "[MASK] {}: {} -> {} voxels",
        roi.name(),
        roi.voxel_count(),
        result.voxel_count()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nuisance_structures::Affine;

    fn roi_from(values: Vec<bool>) -> Roi {
        let mask = Array3::from_shape_vec((2, 2, 1), values).unwrap();
        Roi::new("wm", BinaryMask::new(mask, Affine::identity()))
    }

    #[test]
    fn test_intersection_keeps_name_and_boundary_affine() {
        let roi = roi_from(vec![true, true, false, true]);
        let boundary_affine = Affine::from_zooms([2.0; 3], [0.0; 3]);
        let boundary = BinaryMask::new(
            Array3::from_shape_vec((2, 2, 1), vec![true, false, true, true]).unwrap(),
            boundary_affine,
        );
        let masked = apply_mask(&roi, &boundary).unwrap();
        assert_eq!(masked.name(), "wm");
        assert_eq!(masked.affine(), &boundary_affine);
        assert_eq!(masked.voxel_count(), 2);
        assert!(masked.mask().mask()[[0, 0, 0]]);
        assert!(masked.mask().mask()[[1, 1, 0]]);
    }

    #[test]
    fn test_empty_boundary_gives_empty_roi() {
        let roi = roi_from(vec![true; 4]);
        let boundary = BinaryMask::new(Array3::from_elem((2, 2, 1), false), Affine::identity());
        assert_eq!(apply_mask(&roi, &boundary).unwrap().voxel_count(), 0);
    }

    #[test]
    fn test_shape_mismatch_is_grid_mismatch() {
        let roi = roi_from(vec![true; 4]);
        let boundary = BinaryMask::new(Array3::from_elem((2, 2, 2), true), Affine::identity());
        assert!(matches!(
            apply_mask(&roi, &boundary),
            Err(ConfoundError::GridMismatch { .. })
        ));
    }
}
