// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Error types for confound extraction.

Every numeric variant names the component that raised it and the input it
was working on (tissue, ROI or mask name).
*/

use nuisance_config::{ConfigError, Erosion};
use nuisance_structures::ImagingError;
use std::fmt;
use std::path::PathBuf;

/// Result type for confound operations
pub type ConfoundResult<T> = Result<T, ConfoundError>;

/// Processing stage that raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    RegionBuilder,
    MapCombiner,
    GridResampler,
    BoundaryMasker,
    SignalExtractor,
    CompCorEngine,
    ConfoundsTable,
    Workflow,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::RegionBuilder => "RegionBuilder",
            Component::MapCombiner => "MapCombiner",
            Component::GridResampler => "GridResampler",
            Component::BoundaryMasker => "BoundaryMasker",
            Component::SignalExtractor => "SignalExtractor",
            Component::CompCorEngine => "CompCorEngine",
            Component::ConfoundsTable => "ConfoundsTable",
            Component::Workflow => "Workflow",
        };
        f.write_str(name)
    }
}

/// Step of region construction that left no voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStep {
    Threshold,
    RegionErosion,
    MaskIntersection,
}

impl fmt::Display for RegionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionStep::Threshold => f.write_str("thresholding"),
            RegionStep::RegionErosion => f.write_str("region erosion"),
            RegionStep::MaskIntersection => f.write_str("intersection with the eroded mask"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfoundError {
    #[error("[{component}] shape mismatch for '{input}': {reason}")]
    ShapeMismatch {
        component: Component,
        input: String,
        reason: String,
    },

    #[error("[{component}] grid mismatch for '{input}': {reason}")]
    GridMismatch {
        component: Component,
        input: String,
        reason: String,
    },

    #[error("[RegionBuilder] region '{tissue}' is empty after {step} (erosion: {erosion})")]
    EmptyRegion {
        tissue: String,
        erosion: Erosion,
        step: RegionStep,
    },

    #[error("[{component}] ROI '{roi}' contains no voxels")]
    EmptyRoi { component: Component, roi: String },

    #[error("[CompCorEngine] ROI '{roi}' has {available} voxels but {requested} components were requested")]
    InsufficientVoxels {
        roi: String,
        available: usize,
        requested: usize,
    },

    #[error("[CompCorEngine] every voxel time series in '{roi}' is degenerate ({voxels} voxels)")]
    DegenerateSeries { roi: String, voxels: usize },

    #[error("[{component}] invalid parameter for '{input}': {reason}")]
    InvalidParameter {
        component: Component,
        input: String,
        reason: String,
    },

    #[error("Failed to write {path}: {reason}")]
    Output { path: PathBuf, reason: String },

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConfoundError {
    pub(crate) fn invalid(component: Component, input: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfoundError::InvalidParameter {
            component,
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Component that raised the error, when it came from a processing stage
    pub fn component(&self) -> Option<Component> {
        match self {
            ConfoundError::ShapeMismatch { component, .. }
            | ConfoundError::GridMismatch { component, .. }
            | ConfoundError::EmptyRoi { component, .. }
            | ConfoundError::InvalidParameter { component, .. } => Some(*component),
            ConfoundError::EmptyRegion { .. } => Some(Component::RegionBuilder),
            ConfoundError::InsufficientVoxels { .. } | ConfoundError::DegenerateSeries { .. } => {
                Some(Component::CompCorEngine)
            }
            ConfoundError::Output { .. }
            | ConfoundError::Imaging(_)
            | ConfoundError::Config(_) => None,
        }
    }
}
