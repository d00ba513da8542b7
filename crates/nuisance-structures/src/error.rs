// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Result type for image-level operations
pub type ImagingResult<T> = Result<T, ImagingError>;

/// Errors raised while constructing, loading or saving images.
///
/// Everything in here is detected eagerly (at construction or load time) so
/// that malformed inputs never reach the numeric stages.
///
/// # Examples
/// ```
/// use nuisance_structures::{Affine, Image, ImageHeader, ImagingError};
/// use ndarray::ArrayD;
///
/// let data = ArrayD::<f64>::zeros(vec![2, 2]);
/// let err = Image::new(data, Affine::identity(), ImageHeader::default()).unwrap_err();
/// assert!(matches!(err, ImagingError::InvalidDimensionality { .. }));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Failed to read image {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Failed to write image {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("Invalid affine: {0}")]
    InvalidAffine(String),

    #[error("Expected a 3-D or 4-D image, got {ndim} dimensions (shape {shape:?})")]
    InvalidDimensionality { ndim: usize, shape: Vec<usize> },

    #[error("Invalid voxel values in {name}: {reason}")]
    InvalidValues { name: String, reason: String },

    #[error("Unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
