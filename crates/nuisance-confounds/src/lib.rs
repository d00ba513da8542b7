// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
# nuisance-confounds

Anatomical CompCor confound extraction for functional MRI.

## Components

- **roi**: tissue-probability map to binary ROI (threshold, erosion, mask)
- **combine**: merging several probability maps
- **resample**: moving image onto a fixed voxel grid
- **boundary**: restricting a ROI to a brain mask
- **signals**: mean time course per ROI
- **compcor**: principal noise components of a ROI
- **steady_state**: leading non-steady-state volume detection
- **workflow**: everything above wired together, with caching

## Example

```rust,no_run
use nuisance_config::NuisanceConfig;
use nuisance_confounds::prelude::*;

let workflow = ConfoundWorkflow::new(NuisanceConfig::default())?;
let paths = ConfoundInputPaths {
    anatomical: None,
    anatomical_mask: "anat_brainmask.nii.gz".into(),
    wm_probability: "anat_wm_probseg.nii.gz".into(),
    csf_probability: "anat_csf_probseg.nii.gz".into(),
    bold: "bold.nii.gz".into(),
    bold_mask: "bold_brainmask.nii.gz".into(),
};
let outputs = workflow.run_paths(&paths)?;
outputs.write("out/sub-01_task-rest")?;
# Ok::<(), nuisance_confounds::ConfoundError>(())
```
*/

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod boundary;
pub mod cache;
pub mod combine;
pub mod compcor;
pub mod error;
pub mod morphology;
pub mod resample;
pub mod roi;
pub mod signals;
pub mod steady_state;
pub mod table;
pub mod workflow;

pub use boundary::apply_mask;
pub use cache::{ArtifactCache, CacheKey, CacheStats};
pub use combine::combine;
pub use compcor::{compute, cosine_basis, CompCorOutput, CompCorParams, ComponentMetadata};
pub use error::{Component, ConfoundError, ConfoundResult, RegionStep};
pub use resample::{resample, resample_roi, Grid, Interpolation};
pub use roi::{build_roi, RoiParams};
pub use signals::extract;
pub use steady_state::detect_non_steady_state;
pub use table::ConfoundsTable;
pub use workflow::{
    ConfoundInputPaths, ConfoundInputs, ConfoundOutputs, ConfoundWorkflow, WorkflowProgress,
    WorkflowStage,
};

pub mod prelude {
    pub use crate::compcor::{CompCorOutput, CompCorParams};
    pub use crate::error::{ConfoundError, ConfoundResult};
    pub use crate::resample::{Grid, Interpolation};
    pub use crate::roi::RoiParams;
    pub use crate::table::ConfoundsTable;
    pub use crate::workflow::{ConfoundInputPaths, ConfoundInputs, ConfoundOutputs, ConfoundWorkflow};
}
