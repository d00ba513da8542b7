// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Typed wrappers over [`Image`]: tissue-probability maps, binary masks and ROIs.

The wrappers enforce their value domain at construction so downstream code
can rely on it without re-checking.
*/

use crate::affine::{Affine, AFFINE_TOLERANCE};
use crate::error::{ImagingError, ImagingResult};
use crate::image::{Image, ImageHeader, VoxelType};
use ndarray::{Array3, ArrayD};

/// Probabilities written to single precision may overshoot [0, 1] slightly
const PROBABILITY_TOLERANCE: f64 = 1e-4;

/// Voxel-wise probability of tissue membership, values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    name: String,
    probabilities: Array3<f64>,
    affine: Affine,
}

impl ProbabilityMap {
    /// Wrap a 3-D image, rejecting values outside [0, 1]. Values within
    /// float noise of the bounds are clipped.
    pub fn new(name: impl Into<String>, image: &Image) -> ImagingResult<Self> {
        let name = name.into();
        let volume = match image.volume(0) {
            Some(volume) if image.ndim() == 3 => volume,
            _ => {
                return Err(ImagingError::InvalidValues {
                    name,
                    reason: format!("probability maps must be 3-D, got shape {:?}", image.shape()),
                })
            }
        };
        if let Some(bad) = volume.iter().find(|v| {
            !v.is_finite() || **v < -PROBABILITY_TOLERANCE || **v > 1.0 + PROBABILITY_TOLERANCE
        }) {
            return Err(ImagingError::InvalidValues {
                name,
                reason: format!("value {} outside [0, 1]", bad),
            });
        }
        Ok(Self {
            name,
            probabilities: volume.mapv(|v| v.clamp(0.0, 1.0)),
            affine: *image.affine(),
        })
    }

    /// Build directly from probabilities already known to lie in [0, 1].
    pub(crate) fn from_clipped(name: String, probabilities: Array3<f64>, affine: Affine) -> Self {
        Self {
            name,
            probabilities,
            affine,
        }
    }

    /// Re-wrap clipped probabilities produced by a combination of maps.
    pub fn from_probabilities(
        name: impl Into<String>,
        probabilities: Array3<f64>,
        affine: Affine,
    ) -> Self {
        Self::from_clipped(name.into(), probabilities.mapv(|v| v.clamp(0.0, 1.0)), affine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn shape(&self) -> [usize; 3] {
        let shape = self.probabilities.shape();
        [shape[0], shape[1], shape[2]]
    }

    pub fn probabilities(&self) -> &Array3<f64> {
        &self.probabilities
    }

    /// Same grid (shape and affine) as another map.
    pub fn same_grid(&self, other: &ProbabilityMap) -> bool {
        self.shape() == other.shape() && self.affine.approx_eq(&other.affine, AFFINE_TOLERANCE)
    }

    pub fn content_hash(&self) -> u64 {
        self.to_image().content_hash()
    }

    pub fn to_image(&self) -> Image {
        Image::from_parts(
            self.probabilities.clone().into_dyn(),
            self.affine,
            ImageHeader::with_datatype(VoxelType::Float32),
        )
    }
}

/// A {0, 1} mask on a 3-D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    mask: Array3<bool>,
    affine: Affine,
}

impl BinaryMask {
    pub fn new(mask: Array3<bool>, affine: Affine) -> Self {
        Self { mask, affine }
    }

    /// Non-zero voxels of a 3-D image become `true`.
    pub fn from_image(image: &Image) -> ImagingResult<Self> {
        let volume = image.volume(0).filter(|_| image.ndim() == 3).ok_or_else(|| {
            ImagingError::InvalidDimensionality {
                ndim: image.ndim(),
                shape: image.shape().to_vec(),
            }
        })?;
        Ok(Self {
            mask: volume.mapv(|v| v != 0.0 && !v.is_nan()),
            affine: *image.affine(),
        })
    }

    pub fn mask(&self) -> &Array3<bool> {
        &self.mask
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn shape(&self) -> [usize; 3] {
        let shape = self.mask.shape();
        [shape[0], shape[1], shape[2]]
    }

    pub fn voxel_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.mask.iter().any(|&v| v)
    }

    /// Flat (row-major) indices of the true voxels, in ascending order.
    pub fn true_indices(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| v.then_some(i))
            .collect()
    }

    /// uint8 image for writing to disk.
    pub fn to_image(&self) -> Image {
        let data: ArrayD<f64> = self.mask.mapv(|v| if v { 1.0 } else { 0.0 }).into_dyn();
        Image::from_parts(data, self.affine, ImageHeader::with_datatype(VoxelType::Uint8))
    }

    pub fn content_hash(&self) -> u64 {
        self.to_image().content_hash()
    }
}

impl TryFrom<&Image> for BinaryMask {
    type Error = ImagingError;

    fn try_from(image: &Image) -> Result<Self, Self::Error> {
        BinaryMask::from_image(image)
    }
}

/// A named region of interest. Owns its voxels; keeps no link to the
/// probability map(s) it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    name: String,
    mask: BinaryMask,
}

impl Roi {
    pub fn new(name: impl Into<String>, mask: BinaryMask) -> Self {
        Self {
            name: name.into(),
            mask,
        }
    }

    pub fn from_image(name: impl Into<String>, image: &Image) -> ImagingResult<Self> {
        Ok(Self::new(name, BinaryMask::from_image(image)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same voxels under another name.
    pub fn renamed(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mask: self.mask,
        }
    }

    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }

    pub fn into_mask(self) -> BinaryMask {
        self.mask
    }

    pub fn voxel_count(&self) -> usize {
        self.mask.voxel_count()
    }

    pub fn shape(&self) -> [usize; 3] {
        self.mask.shape()
    }

    pub fn affine(&self) -> &Affine {
        self.mask.affine()
    }

    pub fn to_image(&self) -> Image {
        self.mask.to_image()
    }
}
