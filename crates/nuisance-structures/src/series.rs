// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Functional (BOLD) time series: a 4-D image whose last axis is time.
*/

use crate::affine::Affine;
use crate::error::{ImagingError, ImagingResult};
use crate::image::Image;
use crate::masks::BinaryMask;
use ndarray::{Array2, Axis};

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionalSeries {
    name: String,
    image: Image,
}

impl FunctionalSeries {
    /// Wrap a 4-D image. The repetition time, if any, comes from the header.
    pub fn new(name: impl Into<String>, image: Image) -> ImagingResult<Self> {
        let name = name.into();
        if image.ndim() != 4 {
            return Err(ImagingError::InvalidDimensionality {
                ndim: image.ndim(),
                shape: image.shape().to_vec(),
            });
        }
        if image.n_volumes() == 0 {
            return Err(ImagingError::InvalidValues {
                name,
                reason: "series has no volumes".to_string(),
            });
        }
        Ok(Self { name, image })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn affine(&self) -> &Affine {
        self.image.affine()
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        self.image.spatial_shape()
    }

    pub fn n_volumes(&self) -> usize {
        self.image.n_volumes()
    }

    /// Repetition time recorded in the header, in seconds.
    pub fn header_repetition_time(&self) -> Option<f64> {
        self.image
            .header()
            .repetition_time
            .filter(|tr| tr.is_finite() && *tr > 0.0)
    }

    /// Explicit value if given, otherwise the header's.
    pub fn resolve_repetition_time(&self, configured: Option<f64>) -> Option<f64> {
        configured.or_else(|| self.header_repetition_time())
    }

    /// Time course of one voxel.
    pub fn voxel_series(&self, index: [usize; 3]) -> Option<Vec<f64>> {
        let [x, y, z] = index;
        let [nx, ny, nz] = self.spatial_shape();
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        Some(
            (0..self.n_volumes())
                .map(|t| self.image.data()[[x, y, z, t]])
                .collect(),
        )
    }

    /// Time-by-voxel matrix of the voxels selected by `mask`, restricted to
    /// volumes `first_volume..T`. Columns follow row-major voxel order.
    pub fn masked_matrix(&self, mask: &BinaryMask, first_volume: usize) -> Array2<f64> {
        let n_rows = self.n_volumes().saturating_sub(first_volume);
        let voxels: Vec<[usize; 3]> = mask
            .mask()
            .indexed_iter()
            .filter_map(|((x, y, z), &on)| on.then_some([x, y, z]))
            .collect();
        let data = self.image.data();
        Array2::from_shape_fn((n_rows, voxels.len()), |(row, col)| {
            let [x, y, z] = voxels[col];
            data[[x, y, z, first_volume + row]]
        })
    }

    /// Spatial mean of every volume over the whole grid.
    pub fn global_mean(&self) -> Vec<f64> {
        let n = self.image.n_spatial_voxels().max(1) as f64;
        self.image
            .data()
            .axis_iter(Axis(3))
            .map(|volume| volume.sum() / n)
            .collect()
    }
}

impl TryFrom<Image> for FunctionalSeries {
    type Error = ImagingError;

    fn try_from(image: Image) -> Result<Self, Self::Error> {
        FunctionalSeries::new("bold", image)
    }
}
