// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Core image container: an array of voxel values on a grid described by an affine.
*/

use crate::affine::{Affine, AFFINE_TOLERANCE};
use crate::error::{ImagingError, ImagingResult};
use ndarray::{ArrayD, ArrayView3, Axis, Ix3};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

/// On-disk voxel storage type. Computation always happens in `f64`; this only
/// controls what gets written back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoxelType {
    Uint8,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl VoxelType {
    /// NIfTI-1 `datatype` code
    pub fn nifti_code(&self) -> i16 {
        match self {
            VoxelType::Uint8 => 2,
            VoxelType::Int16 => 4,
            VoxelType::Int32 => 8,
            VoxelType::Float32 => 16,
            VoxelType::Float64 => 64,
        }
    }

    pub fn from_nifti_code(code: i16) -> ImagingResult<Self> {
        match code {
            2 => Ok(VoxelType::Uint8),
            4 => Ok(VoxelType::Int16),
            8 => Ok(VoxelType::Int32),
            16 => Ok(VoxelType::Float32),
            64 => Ok(VoxelType::Float64),
            other => Err(ImagingError::UnsupportedDatatype(other)),
        }
    }

    pub fn bits_per_voxel(&self) -> i16 {
        match self {
            VoxelType::Uint8 => 8,
            VoxelType::Int16 => 16,
            VoxelType::Int32 | VoxelType::Float32 => 32,
            VoxelType::Float64 => 64,
        }
    }
}

/// Header information that travels with the voxel data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub datatype: VoxelType,
    /// Seconds between volumes, when the image is a time series
    pub repetition_time: Option<f64>,
}

impl Default for ImageHeader {
    fn default() -> Self {
        Self {
            datatype: VoxelType::Float32,
            repetition_time: None,
        }
    }
}

impl ImageHeader {
    pub fn with_datatype(datatype: VoxelType) -> Self {
        Self {
            datatype,
            ..Self::default()
        }
    }
}

/// A 3-D volume or 4-D series (time on the last axis) plus its grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: ArrayD<f64>,
    affine: Affine,
    header: ImageHeader,
}

impl Image {
    pub fn new(data: ArrayD<f64>, affine: Affine, header: ImageHeader) -> ImagingResult<Self> {
        let ndim = data.ndim();
        if !(3..=4).contains(&ndim) {
            return Err(ImagingError::InvalidDimensionality {
                ndim,
                shape: data.shape().to_vec(),
            });
        }
        Ok(Self {
            data,
            affine,
            header,
        })
    }

    /// Construction for callers that already guarantee a 3-D or 4-D array.
    pub(crate) fn from_parts(data: ArrayD<f64>, affine: Affine, header: ImageHeader) -> Self {
        debug_assert!((3..=4).contains(&data.ndim()));
        Self {
            data,
            affine,
            header,
        }
    }

    /// New image on the same grid (affine and header) with different data.
    pub fn with_data(&self, data: ArrayD<f64>) -> ImagingResult<Self> {
        Self::new(data, self.affine, self.header.clone())
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        let shape = self.data.shape();
        [shape[0], shape[1], shape[2]]
    }

    /// Number of volumes along the time axis (1 for 3-D images).
    pub fn n_volumes(&self) -> usize {
        if self.ndim() == 4 {
            self.data.shape()[3]
        } else {
            1
        }
    }

    pub fn n_spatial_voxels(&self) -> usize {
        self.spatial_shape().iter().product()
    }

    pub fn zooms(&self) -> [f64; 3] {
        self.affine.zooms()
    }

    /// 3-D view of one volume (the whole image for 3-D data).
    pub fn volume(&self, index: usize) -> Option<ArrayView3<'_, f64>> {
        match self.ndim() {
            3 if index == 0 => self.data.view().into_dimensionality::<Ix3>().ok(),
            4 if index < self.n_volumes() => self
                .data
                .index_axis(Axis(3), index)
                .into_dimensionality::<Ix3>()
                .ok(),
            _ => None,
        }
    }

    /// Same spatial shape and (approximately) the same affine.
    pub fn same_grid(&self, other: &Image) -> bool {
        self.spatial_shape() == other.spatial_shape()
            && self.affine.approx_eq(&other.affine, AFFINE_TOLERANCE)
    }

    /// Stable hash over shape, affine and voxel values. Used as cache key input.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        for dim in self.data.shape() {
            hasher.update(&(*dim as u64).to_le_bytes());
        }
        for row in self.affine.to_rows() {
            for value in row {
                hasher.update(&value.to_le_bytes());
            }
        }
        for value in self.data.iter() {
            hasher.update(&value.to_le_bytes());
        }
        hasher.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn image_4d() -> Image {
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4, 5]), |idx| idx[3] as f64);
        Image::new(data, Affine::identity(), ImageHeader::default()).unwrap()
    }

    #[test]
    fn test_spatial_shape_and_volumes() {
        let image = image_4d();
        assert_eq!(image.spatial_shape(), [2, 3, 4]);
        assert_eq!(image.n_volumes(), 5);
        assert_eq!(image.n_spatial_voxels(), 24);
    }

    #[test]
    fn test_volume_view() {
        let image = image_4d();
        let volume = image.volume(3).unwrap();
        assert!(volume.iter().all(|&v| v == 3.0));
        assert!(image.volume(5).is_none());
    }

    #[test]
    fn test_content_hash_changes_with_data() {
        let image = image_4d();
        let mut data = image.data().clone();
        data[[0, 0, 0, 0]] = 42.0;
        let other = image.with_data(data).unwrap();
        assert_ne!(image.content_hash(), other.content_hash());
        assert_eq!(image.content_hash(), image_4d().content_hash());
    }

    #[test]
    fn test_same_grid_tolerates_float_noise() {
        let a = Image::new(
            ArrayD::zeros(IxDyn(&[2, 2, 2])),
            Affine::from_zooms([2.0, 2.0, 2.0], [0.0, 0.0, 0.0]),
            ImageHeader::default(),
        )
        .unwrap();
        let b = Image::new(
            ArrayD::zeros(IxDyn(&[2, 2, 2])),
            Affine::from_zooms([2.0 + 1e-6, 2.0, 2.0], [0.0, 0.0, 0.0]),
            ImageHeader::default(),
        )
        .unwrap();
        assert!(a.same_grid(&b));
    }
}
