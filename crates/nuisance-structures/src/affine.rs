// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Voxel-to-world affine transforms.

An [`Affine`] maps homogeneous voxel indices `(i, j, k, 1)` to physical
coordinates in millimetres. Every image carries one; resampling composes
them to move between grids.
*/

use crate::error::{ImagingError, ImagingResult};
use nalgebra::{Matrix4, Vector4};

/// Tolerance used when comparing affines read back from single-precision headers
pub const AFFINE_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    matrix: Matrix4<f64>,
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Build from row-major rows. No validation happens here; images are
    /// checked with [`Affine::validate`] when loaded or resampled.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self {
            matrix: Matrix4::from_fn(|r, c| rows[r][c]),
        }
    }

    /// Diagonal affine with the given voxel sizes and origin offset.
    pub fn from_zooms(zooms: [f64; 3], origin: [f64; 3]) -> Self {
        Self::from_rows([
            [zooms[0], 0.0, 0.0, origin[0]],
            [0.0, zooms[1], 0.0, origin[1]],
            [0.0, 0.0, zooms[2], origin[2]],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.matrix[(r, c)];
            }
        }
        rows
    }

    /// Finite entries and a non-singular spatial block.
    pub fn validate(&self) -> ImagingResult<()> {
        if self.matrix.iter().any(|v| !v.is_finite()) {
            return Err(ImagingError::InvalidAffine(
                "affine contains non-finite entries".to_string(),
            ));
        }
        let det = self.matrix.fixed_view::<3, 3>(0, 0).determinant();
        if det.abs() < f64::EPSILON {
            return Err(ImagingError::InvalidAffine(format!(
                "spatial block is singular (det = {:e})",
                det
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn try_inverse(&self) -> ImagingResult<Affine> {
        self.validate()?;
        self.matrix
            .try_inverse()
            .map(|matrix| Affine { matrix })
            .ok_or_else(|| ImagingError::InvalidAffine("affine is not invertible".to_string()))
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Affine) -> Affine {
        Affine {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Voxel spacing along each axis (norms of the first three columns).
    pub fn zooms(&self) -> [f64; 3] {
        let mut zooms = [0.0; 3];
        for (axis, zoom) in zooms.iter_mut().enumerate() {
            *zoom = self.matrix.fixed_view::<3, 1>(0, axis).norm();
        }
        zooms
    }

    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let p = self.matrix * Vector4::new(point[0], point[1], point[2], 1.0);
        [p[0], p[1], p[2]]
    }

    pub fn approx_eq(&self, other: &Affine, tolerance: f64) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}
