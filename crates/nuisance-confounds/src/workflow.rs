// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
End-to-end confound extraction.

The workflow owns its configuration, a rayon pool and the artifact cache.

1. **Combine**: the WM and CSF maps are merged before anything else, so a
   grid mismatch between them fails fast
2. **Branches**: WM, CSF and combined ROIs are built on the anatomical
   grid, resampled onto the functional grid and restricted to the
   functional mask, concurrently
3. **Signals**: mean WM and CSF time courses
4. **CompCor**: components of the combined ROI
5. The mean signals and components form one confounds table

Loading and writing are the only steps touching the filesystem.
*/

use crate::boundary::apply_mask;
use crate::cache::{ArtifactCache, CacheKey, CacheStats};
use crate::combine::combine;
use crate::compcor::{compute, CompCorOutput, CompCorParams};
use crate::error::{Component, ConfoundError, ConfoundResult};
use crate::resample::{resample_roi, Grid};
use crate::roi::{build_roi, RoiParams};
use crate::signals::extract;
use crate::steady_state::detect_non_steady_state;
use crate::table::ConfoundsTable;
use nuisance_config::{validate_config, BranchErosion, NuisanceConfig, PreFilter};
use nuisance_structures::{
    load_image, save_image, BinaryMask, FunctionalSeries, Image, ProbabilityMap, Roi,
};
use parking_lot::RwLock;
use rayon::ThreadPool;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Locations of the workflow inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfoundInputPaths {
    /// Anatomical reference, only used to check the anatomical grid
    pub anatomical: Option<PathBuf>,
    pub anatomical_mask: PathBuf,
    pub wm_probability: PathBuf,
    pub csf_probability: PathBuf,
    pub bold: PathBuf,
    pub bold_mask: PathBuf,
}

/// Loaded workflow inputs
#[derive(Debug, Clone)]
pub struct ConfoundInputs {
    pub anatomical: Option<Image>,
    pub anatomical_mask: BinaryMask,
    pub wm_probability: ProbabilityMap,
    pub csf_probability: ProbabilityMap,
    pub series: FunctionalSeries,
    pub bold_mask: BinaryMask,
}

impl ConfoundInputs {
    /// Read every input. Probability maps are named after `class_labels`
    /// (WM first, then CSF).
    pub fn load(paths: &ConfoundInputPaths, class_labels: &[String]) -> ConfoundResult<Self> {
        let [wm_label, csf_label] = match class_labels {
            [wm, csf] => [wm.as_str(), csf.as_str()],
            _ => {
                return Err(ConfoundError::invalid(
                    Component::Workflow,
                    "class_labels",
                    format!("expected 2 labels, got {}", class_labels.len()),
                ))
            }
        };

        let anatomical = paths.anatomical.as_ref().map(load_image).transpose()?;
        let anatomical_mask = BinaryMask::from_image(&load_image(&paths.anatomical_mask)?)?;
        let wm_probability = ProbabilityMap::new(wm_label, &load_image(&paths.wm_probability)?)?;
        let csf_probability =
            ProbabilityMap::new(csf_label, &load_image(&paths.csf_probability)?)?;
        let series = FunctionalSeries::new("bold", load_image(&paths.bold)?)?;
        let bold_mask = BinaryMask::from_image(&load_image(&paths.bold_mask)?)?;

        info!(
            target: "nuisance-confounds",
            "Loaded inputs: anatomical grid {:?}, series {:?} x {} volumes",
            anatomical_mask.shape(),
            series.spatial_shape(),
            series.n_volumes()
        );
        Ok(Self {
            anatomical,
            anatomical_mask,
            wm_probability,
            csf_probability,
            series,
            bold_mask,
        })
    }
}

/// Workflow stage tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    /// Not started
    Idle,
    /// Merging the WM and CSF maps
    Combining,
    /// Building, resampling and masking the three ROIs
    BuildingRois,
    /// Mean WM / CSF signals
    ExtractingSignals,
    /// Noise components of the combined ROI
    ComputingComponents,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    pub stage: WorkflowStage,
    /// Names of the ROIs finished so far
    pub rois_completed: Vec<String>,
    pub skip_volumes: Option<usize>,
    pub components_retained: usize,
    pub duration_ms: u64,
}

impl Default for WorkflowProgress {
    fn default() -> Self {
        Self {
            stage: WorkflowStage::Idle,
            rois_completed: Vec::new(),
            skip_volumes: None,
            components_retained: 0,
            duration_ms: 0,
        }
    }
}

/// Everything the workflow produces
#[derive(Debug, Clone)]
pub struct ConfoundOutputs {
    /// Mean signals followed by the retained components
    pub confounds: ConfoundsTable,
    pub wm_roi: Roi,
    pub csf_roi: Roi,
    pub combined_roi: Roi,
    pub compcor: CompCorOutput,
    pub skip_volumes: usize,
    pub repetition_time: Option<f64>,
    pub save_pre_filter: bool,
}

impl ConfoundOutputs {
    /// Write every output next to `out_base` (`{base}_confounds.tsv`,
    /// `{base}_wm_roi.nii.gz`, ...). Returns the written paths.
    pub fn write(&self, out_base: impl AsRef<Path>) -> ConfoundResult<Vec<PathBuf>> {
        let base = out_base.as_ref();
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfoundError::Output {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let mut written = Vec::new();
        let confounds = with_suffix(base, "_confounds.tsv");
        self.confounds.write_tsv(&confounds)?;
        written.push(confounds);

        for (roi, suffix) in [
            (&self.wm_roi, "_wm_roi.nii.gz"),
            (&self.csf_roi, "_csf_roi.nii.gz"),
            (&self.combined_roi, "_acc_roi.nii.gz"),
        ] {
            let path = with_suffix(base, suffix);
            save_image(&roi.to_image(), &path)?;
            written.push(path);
        }

        let metadata = with_suffix(base, "_acompcor_metadata.tsv");
        self.compcor.write_metadata_tsv(&metadata)?;
        written.push(metadata);

        if self.save_pre_filter {
            let basis = with_suffix(base, "_acompcor_prefilter.tsv");
            self.compcor.pre_filter_basis.write_tsv(&basis)?;
            written.push(basis);
        }

        info!(
            target: "nuisance-confounds",
            "Wrote {} outputs with base {}",
            written.len(),
            base.display()
        );
        Ok(written)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    WhiteMatter,
    Csf,
    Combined,
}

impl Branch {
    fn label(&self) -> &'static str {
        match self {
            Branch::WhiteMatter => "wm",
            Branch::Csf => "csf",
            Branch::Combined => "combined",
        }
    }
}

/// Confound extraction workflow
pub struct ConfoundWorkflow {
    config: NuisanceConfig,
    pool: ThreadPool,
    cache: ArtifactCache,
    progress: Arc<RwLock<WorkflowProgress>>,
}

impl ConfoundWorkflow {
    /// Validate `config` and set up the thread pool and cache.
    pub fn new(config: NuisanceConfig) -> ConfoundResult<Self> {
        validate_config(&config)?;

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("nuisance-worker-{}", index));
        if config.system.max_threads > 0 {
            builder = builder.num_threads(config.system.max_threads);
        }
        let pool = builder.build().map_err(|e| {
            ConfoundError::invalid(
                Component::Workflow,
                "max_threads",
                format!("failed to build thread pool: {}", e),
            )
        })?;

        let cache = match (config.cache.enabled, config.system.work_dir.as_ref()) {
            (false, _) => ArtifactCache::disabled(),
            (true, Some(dir)) => ArtifactCache::with_work_dir(dir),
            (true, None) => ArtifactCache::in_memory(),
        };

        info!(
            target: "nuisance-confounds",
            "Confound workflow ready: {} threads, cache {}",
            pool.current_num_threads(),
            if cache.is_enabled() { "on" } else { "off" }
        );
        Ok(Self {
            config,
            pool,
            cache,
            progress: Arc::new(RwLock::new(WorkflowProgress::default())),
        })
    }

    pub fn config(&self) -> &NuisanceConfig {
        &self.config
    }

    pub fn progress(&self) -> WorkflowProgress {
        self.progress.read().clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load the inputs and run.
    pub fn run_paths(&self, paths: &ConfoundInputPaths) -> ConfoundResult<ConfoundOutputs> {
        let inputs = ConfoundInputs::load(paths, &self.config.signals.class_labels)?;
        self.run(&inputs)
    }

    pub fn run(&self, inputs: &ConfoundInputs) -> ConfoundResult<ConfoundOutputs> {
        let start = Instant::now();
        *self.progress.write() = WorkflowProgress::default();
        let result = self.run_stages(inputs, start);
        if let Err(e) = &result {
            error!(target: "nuisance-confounds", "Confound workflow failed: {}", e);
            self.update_stage(WorkflowStage::Failed, start);
        }
        result
    }

    fn run_stages(&self, inputs: &ConfoundInputs, start: Instant) -> ConfoundResult<ConfoundOutputs> {
        let compcor_config = &self.config.compcor;
        let series = &inputs.series;

        if let Some(anatomical) = &inputs.anatomical {
            if anatomical.spatial_shape() != inputs.anatomical_mask.shape() {
                warn!(
                    target: "nuisance-confounds",
                    "Anatomical image grid {:?} differs from the anatomical mask grid {:?}",
                    anatomical.spatial_shape(),
                    inputs.anatomical_mask.shape()
                );
            }
        }

        let repetition_time = series.resolve_repetition_time(compcor_config.repetition_time);
        if repetition_time.is_none() && compcor_config.pre_filter == PreFilter::Cosine {
            return Err(ConfoundError::invalid(
                Component::Workflow,
                "repetition_time",
                "not configured and missing from the series header",
            ));
        }
        let skip_volumes = match compcor_config.skip_volumes {
            Some(skip) => skip,
            None => detect_non_steady_state(series),
        };
        self.progress.write().skip_volumes = Some(skip_volumes);
        info!(
            target: "nuisance-confounds",
            "Running confound extraction on '{}': {} volumes, TR {:?} s, skipping {}",
            series.name(),
            series.n_volumes(),
            repetition_time,
            skip_volumes
        );

        self.update_stage(WorkflowStage::Combining, start);
        let maps = [inputs.wm_probability.clone(), inputs.csf_probability.clone()];
        let combined = combine(&maps, &self.config.combine.indices, self.config.combine.method)?;

        self.update_stage(WorkflowStage::BuildingRois, start);
        let grid = Grid::of_series(series);
        let roi_config = &self.config.roi;
        let (wm, (csf, acc)) = self.pool.install(|| {
            rayon::join(
                || self.branch(Branch::WhiteMatter, &inputs.wm_probability, &roi_config.wm, inputs, &grid),
                || {
                    rayon::join(
                        || self.branch(Branch::Csf, &inputs.csf_probability, &roi_config.csf, inputs, &grid),
                        || self.branch(Branch::Combined, &combined, &roi_config.combined, inputs, &grid),
                    )
                },
            )
        });
        let (wm_roi, csf_roi, combined_roi) = first_branch_error(wm, csf, acc)?;

        self.update_stage(WorkflowStage::ExtractingSignals, start);
        let signals = self.pool.install(|| {
            extract(
                series,
                &[wm_roi.clone(), csf_roi.clone()],
                &self.config.signals.class_labels,
            )
        })?;

        self.update_stage(WorkflowStage::ComputingComponents, start);
        let params = CompCorParams::from(compcor_config);
        let compcor = self
            .pool
            .install(|| compute(series, &combined_roi, skip_volumes, repetition_time, &params))?;

        let confounds = signals
            .hstack(compcor.components.clone())?
            .with_leading_skipped(skip_volumes);

        {
            let mut progress = self.progress.write();
            progress.components_retained = compcor.components.n_columns();
        }
        self.update_stage(WorkflowStage::Completed, start);
        info!(
            target: "nuisance-confounds",
            "Confound extraction complete in {}ms: {} columns x {} rows",
            start.elapsed().as_millis(),
            confounds.n_columns(),
            confounds.n_rows()
        );

        Ok(ConfoundOutputs {
            confounds,
            wm_roi,
            csf_roi,
            combined_roi,
            compcor,
            skip_volumes,
            repetition_time,
            save_pre_filter: compcor_config.save_pre_filter,
        })
    }

    /// Build → resample → mask, each stage cached.
    fn branch(
        &self,
        branch: Branch,
        tpm: &ProbabilityMap,
        erosion: &BranchErosion,
        inputs: &ConfoundInputs,
        grid: &Grid,
    ) -> ConfoundResult<Roi> {
        let label = branch.label();
        let params = RoiParams::from_config(&self.config.roi, erosion);

        let region_key = CacheKey::builder("region")
            .param("params", params)
            .content(tpm.content_hash())
            .content(inputs.anatomical_mask.content_hash())
            .finish();
        let region = self.cache.get_or_compute(label, region_key, || {
            build_roi(tpm, &inputs.anatomical_mask, &params).map(|roi| roi.renamed(label))
        })?;

        let functional_key = CacheKey::builder("functional-roi")
            .param("grid", (grid.shape, grid.affine.to_rows()))
            .content(region_key.value())
            .content(inputs.bold_mask.content_hash())
            .finish();
        let functional_label = format!("{}_bold", label);
        let roi = self
            .cache
            .get_or_compute(&functional_label, functional_key, || {
                let resampled = resample_roi(&region, grid)?;
                apply_mask(&resampled, &inputs.bold_mask)
            })?
            .renamed(label);

        debug!(
            target: "nuisance-confounds",
            "[WORKFLOW] {} ROI: {} voxels on the functional grid",
            label,
            roi.voxel_count()
        );
        self.progress.write().rois_completed.push(label.to_string());
        Ok(roi)
    }

    fn update_stage(&self, stage: WorkflowStage, start: Instant) {
        let mut p = self.progress.write();
        p.stage = stage;
        p.duration_ms = start.elapsed().as_millis() as u64;
    }
}

/// All three ROIs, or the first failure in WM, CSF, combined order. Later
/// failures are logged.
fn first_branch_error(
    wm: ConfoundResult<Roi>,
    csf: ConfoundResult<Roi>,
    combined: ConfoundResult<Roi>,
) -> ConfoundResult<(Roi, Roi, Roi)> {
    match (wm, csf, combined) {
        (Ok(wm), Ok(csf), Ok(combined)) => Ok((wm, csf, combined)),
        (wm, csf, combined) => {
            let mut first = None;
            for (branch, result) in [
                (Branch::WhiteMatter, wm),
                (Branch::Csf, csf),
                (Branch::Combined, combined),
            ] {
                let Err(e) = result else { continue };
                if first.is_none() {
                    debug!(target: "nuisance-confounds", "[WORKFLOW] {} branch failed first", branch.label());
                    first = Some(e);
                } else {
                    error!(
                        target: "nuisance-confounds",
                        "[WORKFLOW] {} branch also failed: {}",
                        branch.label(),
                        e
                    );
                }
            }
            Err(first.unwrap_or_else(|| {
                ConfoundError::invalid(Component::Workflow, "branches", "branch failed without an error")
            }))
        }
    }
}
