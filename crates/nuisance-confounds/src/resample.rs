// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Resampling onto a fixed voxel grid.

Each target voxel is mapped to world coordinates with the fixed affine and
back into the moving image with the inverse moving affine. Samples that fall
outside the moving volume are 0.
*/

use crate::error::{Component, ConfoundError, ConfoundResult};
use nalgebra::{Matrix4, Vector4};
use ndarray::{Array3, ArrayView3, Zip};
use nuisance_structures::{Affine, BinaryMask, FunctionalSeries, Image, ImageHeader, Roi};
use tracing::debug;

/// Tolerance for samples that land a hair outside the moving volume
const EDGE_TOLERANCE: f64 = 1e-6;

/// Interpolation used by [`resample`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Closest voxel; keeps label values intact
    #[default]
    Nearest,
    /// Trilinear
    Linear,
}

/// A 3-D voxel grid: spatial shape plus voxel-to-world affine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub shape: [usize; 3],
    pub affine: Affine,
}

impl Grid {
    pub fn new(shape: [usize; 3], affine: Affine) -> Self {
        Self { shape, affine }
    }

    pub fn of_image(image: &Image) -> Self {
        Self::new(image.spatial_shape(), *image.affine())
    }

    pub fn of_series(series: &FunctionalSeries) -> Self {
        Self::new(series.spatial_shape(), *series.affine())
    }

    pub fn of_mask(mask: &BinaryMask) -> Self {
        Self::new(mask.shape(), *mask.affine())
    }
}

/// Resample a 3-D image onto `fixed`. The output has exactly the fixed
/// shape and affine, and keeps the moving image's header.
pub fn resample(
    moving: &Image,
    fixed: &Grid,
    interpolation: Interpolation,
) -> ConfoundResult<Image> {
    let volume = match moving.volume(0) {
        Some(volume) if moving.ndim() == 3 => volume,
        _ => {
            return Err(ConfoundError::invalid(
                Component::GridResampler,
                "moving",
                format!("moving image must be 3-D, got shape {:?}", moving.shape()),
            ))
        }
    };
    let data = resample_volume(volume, moving.affine(), fixed, interpolation)?;
    let header = ImageHeader {
        repetition_time: None,
        ..moving.header().clone()
    };
    Ok(Image::new(data.into_dyn(), fixed.affine, header)?)
}

/// Resample a ROI with nearest-neighbour interpolation so it stays binary.
pub fn resample_roi(roi: &Roi, fixed: &Grid) -> ConfoundResult<Roi> {
    let values = roi.mask().mask().mapv(|on| if on { 1.0 } else { 0.0 });
    let data = resample_volume(values.view(), roi.affine(), fixed, Interpolation::Nearest)
        .map_err(|e| match e {
            ConfoundError::GridMismatch { reason, .. } => ConfoundError::GridMismatch {
                component: Component::GridResampler,
                input: roi.name().to_string(),
                reason,
            },
            other => other,
        })?;
    let mask = data.mapv(|v| v > 0.5);
    debug!(
        target: "nuisance-confounds",
        "[RESAMPLE] {}: {} voxels on {:?} -> {} voxels on {:?}",
        roi.name(),
        roi.voxel_count(),
        roi.shape(),
        mask.iter().filter(|&&v| v).count(),
        fixed.shape
    );
    Ok(Roi::new(roi.name(), BinaryMask::new(mask, fixed.affine)))
}

fn resample_volume(
    volume: ArrayView3<'_, f64>,
    moving_affine: &Affine,
    fixed: &Grid,
    interpolation: Interpolation,
) -> ConfoundResult<Array3<f64>> {
    fixed
        .affine
        .validate()
        .map_err(|e| grid_mismatch("fixed", e.to_string()))?;
    let moving_inverse = moving_affine
        .try_inverse()
        .map_err(|e| grid_mismatch("moving", e.to_string()))?;

    // fixed voxel -> world -> moving voxel
    let transform: Matrix4<f64> = *moving_inverse.compose(&fixed.affine).matrix();
    let (mx, my, mz) = volume.dim();
    let moving_dims = [mx, my, mz];

    let sample = |(i, j, k): (usize, usize, usize), out: &mut f64| {
        let p = transform * Vector4::new(i as f64, j as f64, k as f64, 1.0);
        let point = [p[0], p[1], p[2]];
        *out = match interpolation {
            Interpolation::Nearest => sample_nearest(&volume, moving_dims, point),
            Interpolation::Linear => sample_linear(&volume, moving_dims, point),
        };
    };

    let mut output = Array3::<f64>::zeros((fixed.shape[0], fixed.shape[1], fixed.shape[2]));
    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(sample);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(sample);
    Ok(output)
}

fn grid_mismatch(input: &str, reason: String) -> ConfoundError {
    ConfoundError::GridMismatch {
        component: Component::GridResampler,
        input: input.to_string(),
        reason,
    }
}

fn sample_nearest(volume: &ArrayView3<'_, f64>, dims: [usize; 3], point: [f64; 3]) -> f64 {
    let mut index = [0usize; 3];
    for axis in 0..3 {
        let rounded = point[axis].round();
        if rounded < 0.0 || rounded > (dims[axis] as f64 - 1.0) {
            return 0.0;
        }
        index[axis] = rounded as usize;
    }
    volume[index]
}

fn sample_linear(volume: &ArrayView3<'_, f64>, dims: [usize; 3], point: [f64; 3]) -> f64 {
    let mut lower = [0usize; 3];
    let mut upper = [0usize; 3];
    let mut weight = [0.0f64; 3];
    for axis in 0..3 {
        let max = dims[axis] as f64 - 1.0;
        let c = point[axis];
        if c < -EDGE_TOLERANCE || c > max + EDGE_TOLERANCE {
            return 0.0;
        }
        let c = c.clamp(0.0, max);
        let floor = c.floor();
        lower[axis] = floor as usize;
        upper[axis] = (lower[axis] + 1).min(dims[axis] - 1);
        weight[axis] = c - floor;
    }

    let mut value = 0.0;
    for corner in 0..8 {
        let mut w = 1.0;
        let mut index = [0usize; 3];
        for axis in 0..3 {
            if corner & (1 << axis) == 0 {
                index[axis] = lower[axis];
                w *= 1.0 - weight[axis];
            } else {
                index[axis] = upper[axis];
                w *= weight[axis];
            }
        }
        if w != 0.0 {
            value += w * volume[index];
        }
    }
    value
}
