// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # nuisance - anatomical CompCor confound extraction
//!
//! Builds white-matter, CSF and combined noise ROIs from tissue-probability
//! maps, brings them onto the functional grid and derives nuisance
//! regressors from a BOLD series: mean tissue signals plus anatomical
//! CompCor components.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! nuisance = "0.1"  # Default: confounds + observability
//! ```
//!
//! ## Feature Flags
//!
//! - **`confounds`** (default): ROI construction, resampling, signals, CompCor, workflow
//! - **`observability`** (default): tracing initialisation and per-crate debug flags
//! - **`parallel`** (default): voxel loops on the rayon pool
//! - **`file-logging`**: per-run JSON log files
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nuisance::prelude::*;
//!
//! let config = load_config(None, None)?;
//! let flags = parse_debug_flags();
//! let _guard = init_logging(&flags, &nuisance::logging_config(&config))?;
//!
//! let workflow = ConfoundWorkflow::new(config)?;
//! let outputs = workflow.run_paths(&ConfoundInputPaths {
//!     anatomical: None,
//!     anatomical_mask: "anat_brainmask.nii.gz".into(),
//!     wm_probability: "anat_label-WM_probseg.nii.gz".into(),
//!     csf_probability: "anat_label-CSF_probseg.nii.gz".into(),
//!     bold: "bold.nii.gz".into(),
//!     bold_mask: "bold_brainmask.nii.gz".into(),
//! })?;
//! outputs.write("out/sub-01_task-rest")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: nuisance-structures, nuisance-config       │
//! │  (Image, Affine, masks, series, NIfTI I/O, TOML config) │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Algorithms: nuisance-confounds                         │
//! │  (ROIs, resampling, signals, CompCor, workflow)         │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Infrastructure: nuisance-observability                 │
//! │  (tracing subscribers, debug flags, log retention)      │
//! └─────────────────────────────────────────────────────────┘
//! ```

// Always available
pub use nuisance_config as config;
pub use nuisance_structures as structures;

#[cfg(feature = "confounds")]
pub use nuisance_confounds as confounds;

#[cfg(feature = "observability")]
pub use nuisance_observability as observability;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logging settings taken from the `system` section of `config`.
#[cfg(feature = "observability")]
pub fn logging_config(config: &config::NuisanceConfig) -> observability::LoggingConfig {
    observability::LoggingConfig::with_level(config.system.log_level.to_ascii_lowercase())
}

pub mod prelude {
    pub use crate::config::{load_config, validate_config, NuisanceConfig};
    pub use crate::structures::{
        load_image, save_image, Affine, BinaryMask, FunctionalSeries, Image, ImagingError,
        ProbabilityMap, Roi,
    };

    #[cfg(feature = "confounds")]
    pub use crate::confounds::prelude::*;

    #[cfg(feature = "observability")]
    pub use crate::logging_config;
    pub use crate::observability::{
        init_logging, init_logging_default, parse_debug_flags, CrateDebugFlags, LoggingConfig,
    };
}
