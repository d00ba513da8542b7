// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Anatomical CompCor: principal components of the noise-ROI time series.

## Pipeline

1. Time-by-voxel matrix over the ROI, leading skipped volumes dropped
2. Pre-filter: project out a discrete cosine basis plus a constant
   (high-pass), or the constant only
3. Voxels whose filtered series is non-finite or has no variance are
   excluded; the rest are scaled to zero mean and unit variance
4. Thin SVD; components are the left singular vectors, ordered by
   descending singular value, each with its largest-magnitude entry
   positive
5. Retention by count, cumulative variance, or all

Component columns span the whole series; skipped rows are 0.
*/

use crate::error::{Component, ConfoundError, ConfoundResult};
use crate::table::{push_value, ConfoundsTable};
use nalgebra::{DMatrix, SVD};
use ndarray::Array2;
use nuisance_config::{CompCorConfig, ComponentCriterion, PreFilter};
use nuisance_structures::{FunctionalSeries, Roi, AFFINE_TOLERANCE};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Relative standard deviation below which a filtered voxel series is
/// treated as constant
const DEGENERATE_TOLERANCE: f64 = 1e-10;

/// Parameters for [`compute`]
#[derive(Debug, Clone, PartialEq)]
pub struct CompCorParams {
    pub pre_filter: PreFilter,
    /// Cosine filter cutoff period in seconds
    pub high_pass_cutoff: f64,
    pub criterion: ComponentCriterion,
    pub header_prefix: String,
}

impl Default for CompCorParams {
    fn default() -> Self {
        Self::from(&CompCorConfig::default())
    }
}

impl From<&CompCorConfig> for CompCorParams {
    fn from(config: &CompCorConfig) -> Self {
        Self {
            pre_filter: config.pre_filter,
            high_pass_cutoff: config.high_pass_cutoff,
            criterion: config.criterion,
            header_prefix: config.header_prefix.clone(),
        }
    }
}

/// Description of one decomposed component, retained or not
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMetadata {
    pub name: String,
    /// Name of the ROI the component came from
    pub mask: String,
    pub singular_value: f64,
    pub variance_explained: f64,
    pub cumulative_variance: f64,
    pub dropped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompCorOutput {
    /// Retained components, one row per volume of the full series
    pub components: ConfoundsTable,
    /// Every component in descending order of explained variance
    pub metadata: Vec<ComponentMetadata>,
    /// Non-constant cosine regressors and one indicator column per skipped
    /// volume
    pub pre_filter_basis: ConfoundsTable,
    /// Voxels left out because their filtered series was degenerate
    pub excluded_voxels: usize,
    /// Voxels that entered the decomposition
    pub used_voxels: usize,
}

impl CompCorOutput {
    pub fn retained(&self) -> impl Iterator<Item = &ComponentMetadata> {
        self.metadata.iter().filter(|m| !m.dropped)
    }

    pub fn metadata_tsv_string(&self) -> String {
        let mut out = String::from(
            "component\tmask\tsingular_value\tvariance_explained\tcumulative_variance_explained\tretained\n",
        );
        for meta in &self.metadata {
            let _ = write!(out, "{}\t{}\t", meta.name, meta.mask);
            push_value(&mut out, meta.singular_value);
            out.push('\t');
            push_value(&mut out, meta.variance_explained);
            out.push('\t');
            push_value(&mut out, meta.cumulative_variance);
            out.push('\t');
            out.push_str(if meta.dropped { "False" } else { "True" });
            out.push('\n');
        }
        out
    }

    pub fn write_metadata_tsv(&self, path: impl AsRef<Path>) -> ConfoundResult<()> {
        let path = path.as_ref();
        fs::write(path, self.metadata_tsv_string()).map_err(|e| ConfoundError::Output {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Non-constant discrete cosine regressors for `n` samples `repetition_time`
/// seconds apart, removing periods longer than `cutoff` seconds.
///
/// Column `k - 1` is `sqrt(2 / n) * cos(pi / n * (t + 0.5) * k)` for
/// `k = 1..order`, with `order = floor(2 * n * repetition_time / cutoff)`.
pub fn cosine_basis(n: usize, repetition_time: f64, cutoff: f64) -> Array2<f64> {
    if n < 2 {
        return Array2::zeros((n, 0));
    }
    let order = (2.0 * n as f64 * repetition_time / cutoff).floor();
    // one column is kept for the constant, so at most n - 2 cosines
    let order = if order.is_finite() && order >= 1.0 {
        (order as usize).min(n - 1)
    } else {
        1
    };
    let norm = (2.0 / n as f64).sqrt();
    let step = std::f64::consts::PI / n as f64;
    Array2::from_shape_fn((n, order - 1), |(t, col)| {
        norm * (step * (t as f64 + 0.5) * (col + 1) as f64).cos()
    })
}

/// Run aCompCor on `series` within `mask`.
///
/// `repetition_time` is required for the cosine pre-filter only.
pub fn compute(
    series: &FunctionalSeries,
    mask: &Roi,
    skip_volumes: usize,
    repetition_time: Option<f64>,
    params: &CompCorParams,
) -> ConfoundResult<CompCorOutput> {
    let roi = mask.name();
    validate_inputs(series, mask, skip_volumes, repetition_time, params)?;

    let total_volumes = series.n_volumes();
    let n = total_volumes - skip_volumes;
    let data = series.masked_matrix(mask.mask(), skip_volumes);
    let n_voxels = data.ncols();

    // Regressors to project out: cosines (if any) then the constant
    let cosines = match (params.pre_filter, repetition_time) {
        (PreFilter::Cosine, Some(tr)) => cosine_basis(n, tr, params.high_pass_cutoff),
        _ => Array2::zeros((n, 0)),
    };
    let n_cosines = cosines.ncols();
    let regressors = DMatrix::from_fn(n, n_cosines + 1, |r, c| {
        if c < n_cosines {
            cosines[[r, c]]
        } else {
            1.0
        }
    });
    let q = regressors.clone().qr().q();

    let y = DMatrix::from_fn(n, n_voxels, |r, c| data[[r, c]]);
    let residuals = &y - &q * (q.transpose() * &y);

    let mut kept: Vec<usize> = Vec::with_capacity(n_voxels);
    let mut scales: Vec<(f64, f64)> = Vec::with_capacity(n_voxels);
    for (col, residual) in residuals.column_iter().enumerate() {
        let scale = y.column(col).iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
        if residual.iter().any(|v| !v.is_finite()) || !scale.is_finite() {
            continue;
        }
        let mean = residual.mean();
        let std = residual.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let std = std.sqrt();
        if std <= DEGENERATE_TOLERANCE * scale {
            continue;
        }
        kept.push(col);
        scales.push((mean, std));
    }
    let excluded_voxels = n_voxels - kept.len();
    if kept.is_empty() {
        return Err(ConfoundError::DegenerateSeries {
            roi: roi.to_string(),
            voxels: n_voxels,
        });
    }
    if excluded_voxels > 0 {
        warn!(
            target: "nuisance-confounds",
            "[COMPCOR] {}: excluded {} of {} voxels with degenerate time series",
            roi,
            excluded_voxels,
            n_voxels
        );
    }

    let normalized = DMatrix::from_fn(n, kept.len(), |r, c| {
        let (mean, std) = scales[c];
        (residuals[(r, kept[c])] - mean) / std
    });

    let svd = SVD::try_new(normalized, true, false, f64::EPSILON, 0).ok_or_else(|| {
        ConfoundError::invalid(Component::CompCorEngine, roi, "SVD did not converge")
    })?;
    let u = svd.u.ok_or_else(|| {
        ConfoundError::invalid(Component::CompCorEngine, roi, "SVD returned no left vectors")
    })?;
    let singular = svd.singular_values;

    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by(|&a, &b| singular[b].total_cmp(&singular[a]));

    let total_power: f64 = singular.iter().map(|s| s * s).sum();
    let variance: Vec<f64> = order
        .iter()
        .map(|&i| {
            if total_power > 0.0 {
                singular[i] * singular[i] / total_power
            } else {
                0.0
            }
        })
        .collect();
    let cumulative: Vec<f64> = variance
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect();

    // Projecting out the regressors removes one dimension per column; the
    // singular vectors beyond that rank span numerical noise only.
    let structural_rank = (n - regressors.ncols()).min(kept.len());
    let s_max = order.first().map(|&i| singular[i]).unwrap_or(0.0);
    let cutoff = s_max * n.max(kept.len()) as f64 * f64::EPSILON;
    let numerical_rank = order
        .iter()
        .take_while(|&&i| singular[i] > cutoff)
        .count();
    let rank = structural_rank.min(numerical_rank);
    let retained = retained_count(params.criterion, &cumulative, rank, roi);

    let mut components = ConfoundsTable::new(total_volumes).with_leading_skipped(skip_volumes);
    let mut metadata = Vec::with_capacity(order.len());
    for (rank, &index) in order.iter().enumerate() {
        let dropped = rank >= retained;
        let name = if dropped {
            format!("dropped_{}", rank - retained)
        } else {
            format!("{}{:02}", params.header_prefix, rank)
        };
        if !dropped {
            let column = u.column(index);
            let peak = column
                .iter()
                .fold(0.0f64, |best, &v| if v.abs() > best.abs() { v } else { best });
            let sign = if peak < 0.0 { -1.0 } else { 1.0 };
            let mut values = vec![0.0; skip_volumes];
            values.extend(column.iter().map(|v| sign * v));
            components.push_column(name.clone(), values)?;
        }
        metadata.push(ComponentMetadata {
            name,
            mask: roi.to_string(),
            singular_value: singular[index],
            variance_explained: variance[rank],
            cumulative_variance: cumulative[rank],
            dropped,
        });
    }

    let pre_filter_basis = pre_filter_table(&cosines, total_volumes, skip_volumes)?;

    info!(
        target: "nuisance-confounds",
        "[COMPCOR] {}: {} voxels ({} excluded), {} volumes ({} skipped), kept {} of {} components",
        roi,
        kept.len(),
        excluded_voxels,
        n,
        skip_volumes,
        retained,
        metadata.len()
    );

    Ok(CompCorOutput {
        components,
        metadata,
        pre_filter_basis,
        excluded_voxels,
        used_voxels: kept.len(),
    })
}

fn validate_inputs(
    series: &FunctionalSeries,
    mask: &Roi,
    skip_volumes: usize,
    repetition_time: Option<f64>,
    params: &CompCorParams,
) -> ConfoundResult<()> {
    let roi = mask.name();
    if mask.shape() != series.spatial_shape()
        || !mask.affine().approx_eq(series.affine(), AFFINE_TOLERANCE)
    {
        return Err(ConfoundError::GridMismatch {
            component: Component::CompCorEngine,
            input: roi.to_string(),
            reason: format!(
                "mask grid {:?} does not match series grid {:?}",
                mask.shape(),
                series.spatial_shape()
            ),
        });
    }
    let voxels = mask.voxel_count();
    if voxels == 0 {
        return Err(ConfoundError::EmptyRoi {
            component: Component::CompCorEngine,
            roi: roi.to_string(),
        });
    }
    let total = series.n_volumes();
    if total < skip_volumes + 2 {
        return Err(ConfoundError::invalid(
            Component::CompCorEngine,
            roi,
            format!(
                "skipping {} of {} volumes leaves fewer than 2",
                skip_volumes, total
            ),
        ));
    }
    if params.pre_filter == PreFilter::Cosine {
        match repetition_time {
            Some(tr) if tr.is_finite() && tr > 0.0 => {}
            Some(tr) => {
                return Err(ConfoundError::invalid(
                    Component::CompCorEngine,
                    "repetition_time",
                    format!("must be positive, got {}", tr),
                ))
            }
            None => {
                return Err(ConfoundError::invalid(
                    Component::CompCorEngine,
                    "repetition_time",
                    "the cosine pre-filter needs a repetition time",
                ))
            }
        }
        if !(params.high_pass_cutoff.is_finite() && params.high_pass_cutoff > 0.0) {
            return Err(ConfoundError::invalid(
                Component::CompCorEngine,
                "high_pass_cutoff",
                format!("must be positive, got {}", params.high_pass_cutoff),
            ));
        }
    }
    match params.criterion {
        ComponentCriterion::Count(count) if voxels < count => {
            return Err(ConfoundError::InsufficientVoxels {
                roi: roi.to_string(),
                available: voxels,
                requested: count,
            })
        }
        ComponentCriterion::VarianceThreshold(fraction) if !(fraction > 0.0 && fraction <= 1.0) => {
            return Err(ConfoundError::invalid(
                Component::CompCorEngine,
                "criterion",
                format!("variance threshold must be in (0, 1], got {}", fraction),
            ))
        }
        _ => {}
    }
    Ok(())
}

/// Number of components kept for `criterion` given the cumulative variance
/// of every component. Never more than `rank`.
fn retained_count(
    criterion: ComponentCriterion,
    cumulative: &[f64],
    rank: usize,
    roi: &str,
) -> usize {
    let available = rank.min(cumulative.len());
    match criterion {
        ComponentCriterion::Count(count) => {
            if count > available {
                warn!(
                    target: "nuisance-confounds",
                    "[COMPCOR] {}: {} components requested but only {} available",
                    roi,
                    count,
                    available
                );
            }
            count.min(available)
        }
        ComponentCriterion::VarianceThreshold(fraction) => {
            let reached = cumulative.partition_point(|&c| c < fraction);
            (reached + 1).min(available)
        }
        ComponentCriterion::All => available,
    }
}

fn pre_filter_table(
    cosines: &Array2<f64>,
    total_volumes: usize,
    skip_volumes: usize,
) -> ConfoundResult<ConfoundsTable> {
    let mut table = ConfoundsTable::new(total_volumes).with_leading_skipped(skip_volumes);
    for (k, column) in cosines.columns().into_iter().enumerate() {
        let mut values = vec![0.0; skip_volumes];
        values.extend(column.iter().copied());
        table.push_column(format!("cosine_{:02}", k), values)?;
    }
    for volume in 0..skip_volumes {
        let mut values = vec![0.0; total_volumes];
        values[volume] = 1.0;
        table.push_column(format!("non_steady_state_outlier_{:02}", volume), values)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayD, IxDyn};
    use nuisance_structures::{Affine, BinaryMask, Image, ImageHeader};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_series(shape: [usize; 3], volumes: usize, seed: u64) -> FunctionalSeries {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = ArrayD::from_shape_fn(
            IxDyn(&[shape[0], shape[1], shape[2], volumes]),
            |_| 100.0 + rng.gen_range(-1.0..1.0),
        );
        let image = Image::new(data, Affine::identity(), ImageHeader::default()).unwrap();
        FunctionalSeries::new("bold", image).unwrap()
    }

    fn full_roi(shape: [usize; 3]) -> Roi {
        let mask = Array3::from_elem((shape[0], shape[1], shape[2]), true);
        Roi::new("combined", BinaryMask::new(mask, Affine::identity()))
    }

    fn params(criterion: ComponentCriterion) -> CompCorParams {
        CompCorParams {
            criterion,
            ..CompCorParams::default()
        }
    }

    #[test]
    fn test_cosine_basis_order() {
        // order = floor(2 * 100 * 2 / 128) = 3: two cosines plus the constant
        let basis = cosine_basis(100, 2.0, 128.0);
        assert_eq!(basis.dim(), (100, 2));
        // orthonormal columns
        let dot: f64 = basis.column(0).dot(&basis.column(1));
        assert!(dot.abs() < 1e-10);
        assert!((basis.column(0).dot(&basis.column(0)) - 1.0).abs() < 1e-10);
        assert_eq!(cosine_basis(46, 2.0, 128.0).ncols(), 0);
    }

    #[test]
    fn test_components_and_metadata() {
        let series = noisy_series([4, 4, 2], 40, 7);
        let output = compute(
            &series,
            &full_roi([4, 4, 2]),
            0,
            Some(2.0),
            &params(ComponentCriterion::Count(5)),
        )
        .unwrap();

        assert_eq!(output.components.n_rows(), 40);
        assert_eq!(output.components.column_names()[0], "a_comp_cor_00");
        assert_eq!(output.components.n_columns(), 5);
        assert_eq!(output.retained().count(), 5);
        assert_eq!(output.excluded_voxels, 0);

        for pair in output.metadata.windows(2) {
            assert!(pair[0].variance_explained >= pair[1].variance_explained);
        }
        let total: f64 = output.metadata.iter().map(|m| m.variance_explained).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(output.metadata[5].name, "dropped_0");
        assert!(output.metadata[5].dropped);

        // unit-norm, zero-mean columns with a positive peak
        for name in output.components.column_names() {
            let column = output.components.column(name).unwrap();
            let norm: f64 = column.iter().map(|v| v * v).sum();
            assert!((norm - 1.0).abs() < 1e-9);
            assert!(column.iter().sum::<f64>().abs() < 1e-9);
            let peak = column.iter().fold(0.0f64, |b, &v| if v.abs() > b.abs() { v } else { b });
            assert!(peak > 0.0);
        }
    }

    #[test]
    fn test_skipped_rows_are_zero() {
        let series = noisy_series([3, 3, 3], 30, 11);
        let output = compute(
            &series,
            &full_roi([3, 3, 3]),
            4,
            Some(2.0),
            &params(ComponentCriterion::Count(3)),
        )
        .unwrap();
        assert_eq!(output.components.n_rows(), 30);
        assert_eq!(output.components.leading_skipped(), 4);
        let first = output.components.column("a_comp_cor_00").unwrap();
        assert!(first[..4].iter().all(|&v| v == 0.0));
        assert!(first[4..].iter().any(|&v| v != 0.0));

        let basis = &output.pre_filter_basis;
        assert_eq!(basis.column_names().len(), 4);
        assert_eq!(
            basis.column("non_steady_state_outlier_02").unwrap()[2],
            1.0
        );
    }

    #[test]
    fn test_variance_threshold() {
        let series = noisy_series([4, 4, 4], 30, 3);
        let output = compute(
            &series,
            &full_roi([4, 4, 4]),
            0,
            Some(2.0),
            &params(ComponentCriterion::VarianceThreshold(0.5)),
        )
        .unwrap();
        let kept: Vec<&ComponentMetadata> = output.retained().collect();
        let last = kept[kept.len() - 1];
        assert!(last.cumulative_variance >= 0.5);
        if kept.len() > 1 {
            assert!(kept[kept.len() - 2].cumulative_variance < 0.5);
        }
    }

    #[test]
    fn test_count_clamped_to_available_components() {
        // 10 volumes less the removed mean leave 9 components
        let series = noisy_series([4, 4, 4], 10, 5);
        let output = compute(
            &series,
            &full_roi([4, 4, 4]),
            0,
            None,
            &CompCorParams {
                pre_filter: PreFilter::None,
                criterion: ComponentCriterion::Count(20),
                ..CompCorParams::default()
            },
        )
        .unwrap();
        assert_eq!(output.components.n_columns(), 9);
        assert_eq!(output.metadata.len(), 10);
        assert!(output.metadata[9].dropped);
    }

    #[test]
    fn test_count_limited_by_filtered_rank() {
        // 20 volumes at TR 10 s: two cosines plus the constant leave rank 17
        let series = noisy_series([4, 4, 4], 20, 17);
        let output = compute(
            &series,
            &full_roi([4, 4, 4]),
            0,
            Some(10.0),
            &params(ComponentCriterion::Count(20)),
        )
        .unwrap();
        assert_eq!(output.pre_filter_basis.n_columns(), 2);
        assert_eq!(output.components.n_columns(), 17);

        let retained: Vec<&ComponentMetadata> = output.retained().collect();
        let s_max = retained[0].singular_value;
        assert!(retained.iter().all(|m| m.singular_value > 1e-6 * s_max));
        let dropped: Vec<&str> = output
            .metadata
            .iter()
            .filter(|m| m.dropped)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(dropped, ["dropped_0", "dropped_1", "dropped_2"]);

        let all = compute(
            &series,
            &full_roi([4, 4, 4]),
            0,
            Some(10.0),
            &params(ComponentCriterion::All),
        )
        .unwrap();
        assert_eq!(all.components.n_columns(), 17);
    }

    #[test]
    fn test_insufficient_voxels() {
        let series = noisy_series([2, 1, 1], 20, 1);
        let result = compute(
            &series,
            &full_roi([2, 1, 1]),
            0,
            Some(2.0),
            &params(ComponentCriterion::Count(6)),
        );
        assert!(matches!(
            result,
            Err(ConfoundError::InsufficientVoxels {
                available: 2,
                requested: 6,
                ..
            })
        ));
    }

    #[test]
    fn test_degenerate_voxels() {
        let mut rng = StdRng::seed_from_u64(9);
        // voxel x = 0 is constant, the rest are noisy
        let data = ArrayD::from_shape_fn(IxDyn(&[4, 2, 1, 20]), |idx| {
            if idx[0] == 0 {
                50.0
            } else {
                rng.gen_range(0.0..1.0)
            }
        });
        let image = Image::new(data, Affine::identity(), ImageHeader::default()).unwrap();
        let series = FunctionalSeries::new("bold", image).unwrap();
        let output = compute(
            &series,
            &full_roi([4, 2, 1]),
            0,
            Some(2.0),
            &params(ComponentCriterion::Count(2)),
        )
        .unwrap();
        assert_eq!(output.excluded_voxels, 2);
        assert_eq!(output.used_voxels, 6);

        let flat = ArrayD::from_elem(IxDyn(&[2, 2, 1, 10]), 3.0);
        let image = Image::new(flat, Affine::identity(), ImageHeader::default()).unwrap();
        let series = FunctionalSeries::new("bold", image).unwrap();
        let result = compute(
            &series,
            &full_roi([2, 2, 1]),
            0,
            Some(2.0),
            &params(ComponentCriterion::Count(1)),
        );
        assert!(matches!(result, Err(ConfoundError::DegenerateSeries { voxels: 4, .. })));
    }

    #[test]
    fn test_parameter_errors() {
        let series = noisy_series([3, 3, 3], 6, 2);
        let roi = full_roi([3, 3, 3]);
        let p = params(ComponentCriterion::Count(2));
        assert!(matches!(
            compute(&series, &roi, 5, Some(2.0), &p),
            Err(ConfoundError::InvalidParameter { .. })
        ));
        assert!(matches!(
            compute(&series, &roi, 0, None, &p),
            Err(ConfoundError::InvalidParameter { .. })
        ));
        let empty = Roi::new(
            "combined",
            BinaryMask::new(Array3::from_elem((3, 3, 3), false), Affine::identity()),
        );
        assert!(matches!(
            compute(&series, &empty, 0, Some(2.0), &p),
            Err(ConfoundError::EmptyRoi { .. })
        ));
    }

    #[test]
    fn test_metadata_tsv() {
        let series = noisy_series([3, 3, 2], 20, 4);
        let output = compute(
            &series,
            &full_roi([3, 3, 2]),
            0,
            Some(2.0),
            &params(ComponentCriterion::Count(2)),
        )
        .unwrap();
        let tsv = output.metadata_tsv_string();
        let mut lines = tsv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "component\tmask\tsingular_value\tvariance_explained\tcumulative_variance_explained\tretained"
        );
        let first: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(first[0], "a_comp_cor_00");
        assert_eq!(first[1], "combined");
        assert_eq!(first[5], "True");
        assert_eq!(tsv.lines().count(), output.metadata.len() + 1);
    }
}
