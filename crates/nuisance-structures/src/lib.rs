// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The core crate for nuisance. Defines the image, mask and time-series types
//! shared by every processing stage, and reads/writes them as NIfTI-1.

mod affine;
mod error;
mod image;
mod masks;
pub mod nifti_io;
mod series;

pub use affine::{Affine, AFFINE_TOLERANCE};
pub use error::{ImagingError, ImagingResult};
pub use image::{Image, ImageHeader, VoxelType};
pub use masks::{BinaryMask, ProbabilityMap, Roi};
pub use nifti_io::{load_image, save_image};
pub use series::FunctionalSeries;
