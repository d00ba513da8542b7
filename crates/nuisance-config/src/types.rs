// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `nuisance_configuration.toml`, plus the small parameter enums shared by
//! the processing stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NuisanceConfig {
    pub system: SystemConfig,
    pub roi: RoiConfig,
    pub combine: CombineConfig,
    pub signals: SignalsConfig,
    pub compcor: CompCorConfig,
    pub cache: CacheConfig,
}

/// System-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Worker threads for the processing pool (0 = one per core)
    pub max_threads: usize,
    /// Base tracing level (trace, debug, info, warn, error); debug flags
    /// raise individual crates above it
    pub log_level: String,
    /// Where intermediate artifacts are persisted, if anywhere
    pub work_dir: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            log_level: "info".to_string(),
            work_dir: None,
        }
    }
}

/// Erosion applied to a region or to the boundary mask.
///
/// In TOML: `{ kind = "proportion", value = 0.6 }`, `{ kind = "millimeters", value = 30.0 }`
/// or `{ kind = "none" }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Erosion {
    #[default]
    None,
    /// Erode by a physical distance
    Millimeters(f64),
    /// Erode until at most this fraction of the voxels remain
    Proportion(f64),
}

impl fmt::Display for Erosion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Erosion::None => write!(f, "none"),
            Erosion::Millimeters(mm) => write!(f, "{} mm", mm),
            Erosion::Proportion(p) => write!(f, "proportion {}", p),
        }
    }
}

/// Parses `none`, `mm:30` / `30mm` and `proportion:0.6`.
impl FromStr for Erosion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let invalid = || ConfigError::InvalidValue(format!("cannot parse erosion '{}'", s));
        if s == "none" {
            return Ok(Erosion::None);
        }
        if let Some(value) = s.strip_prefix("mm:").or_else(|| s.strip_suffix("mm")) {
            return value
                .trim()
                .parse()
                .map(Erosion::Millimeters)
                .map_err(|_| invalid());
        }
        if let Some(value) = s.strip_prefix("proportion:") {
            return value
                .trim()
                .parse()
                .map(Erosion::Proportion)
                .map_err(|_| invalid());
        }
        Err(invalid())
    }
}

/// Neighbourhood of the structuring element used by binary erosion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Face neighbours
    #[default]
    Six,
    /// Face, edge and corner neighbours
    TwentySix,
}

impl FromStr for Connectivity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "6" | "six" => Ok(Connectivity::Six),
            "26" | "twenty_six" => Ok(Connectivity::TwentySix),
            other => Err(ConfigError::InvalidValue(format!(
                "connectivity must be 6 or 26, got '{}'",
                other
            ))),
        }
    }
}

/// Region and mask erosion for one tissue branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct BranchErosion {
    pub region: Erosion,
    pub mask: Erosion,
}

/// ROI construction configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoiConfig {
    /// Minimum probability for a voxel to enter a region
    pub threshold: f64,
    pub connectivity: Connectivity,
    pub wm: BranchErosion,
    pub csf: BranchErosion,
    pub combined: BranchErosion,
}

impl Default for RoiConfig {
    fn default() -> Self {
        let proportional = BranchErosion {
            region: Erosion::Proportion(0.6),
            mask: Erosion::Proportion(0.6 * 0.6 * 0.6),
        };
        Self {
            threshold: 0.95,
            connectivity: Connectivity::Six,
            wm: proportional,
            csf: BranchErosion {
                region: Erosion::Millimeters(0.0),
                mask: Erosion::Millimeters(30.0),
            },
            combined: proportional,
        }
    }
}

/// How selected probability maps are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    /// Element-wise sum clipped to [0, 1]
    #[default]
    Sum,
    /// Element-wise maximum
    Maximum,
}

impl FromStr for CombineMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(CombineMethod::Sum),
            "max" | "maximum" => Ok(CombineMethod::Maximum),
            other => Err(ConfigError::InvalidValue(format!(
                "combine method must be 'sum' or 'maximum', got '{}'",
                other
            ))),
        }
    }
}

/// Probability map combination for the combined (WM + CSF) region
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Indices into `[wm, csf]`
    pub indices: Vec<usize>,
    pub method: CombineMethod,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            indices: vec![0, 1],
            method: CombineMethod::Sum,
        }
    }
}

/// Mean-signal extraction configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Column names for the WM and CSF mean signals, in that order
    pub class_labels: Vec<String>,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            class_labels: vec!["white_matter".to_string(), "csf".to_string()],
        }
    }
}

/// Temporal filter applied before the decomposition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreFilter {
    /// Remove the mean only
    None,
    /// Regress out a discrete cosine basis (high-pass)
    #[default]
    Cosine,
}

impl FromStr for PreFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "false" => Ok(PreFilter::None),
            "cosine" => Ok(PreFilter::Cosine),
            other => Err(ConfigError::InvalidValue(format!(
                "pre_filter must be 'none' or 'cosine', got '{}'",
                other
            ))),
        }
    }
}

/// Which components are kept.
///
/// In TOML: `{ kind = "count", value = 6 }`, `{ kind = "variance_threshold", value = 0.5 }`
/// or `{ kind = "all" }`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ComponentCriterion {
    Count(usize),
    /// Smallest number of components whose cumulative explained variance
    /// reaches the fraction
    VarianceThreshold(f64),
    All,
}

impl ComponentCriterion {
    /// Variance fraction used when the criterion is given as `auto`
    pub const AUTO_VARIANCE: f64 = 0.5;
}

impl Default for ComponentCriterion {
    fn default() -> Self {
        ComponentCriterion::Count(6)
    }
}

/// Integers are counts, fractions in (0, 1) are variance thresholds,
/// plus the keywords `all` and `auto`.
impl FromStr for ComponentCriterion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "all" => return Ok(ComponentCriterion::All),
            "auto" => return Ok(ComponentCriterion::VarianceThreshold(Self::AUTO_VARIANCE)),
            _ => {}
        }
        if let Ok(count) = s.parse::<usize>() {
            return Ok(ComponentCriterion::Count(count));
        }
        match s.parse::<f64>() {
            Ok(fraction) if fraction > 0.0 && fraction < 1.0 => {
                Ok(ComponentCriterion::VarianceThreshold(fraction))
            }
            _ => Err(ConfigError::InvalidValue(format!(
                "cannot parse component criterion '{}'",
                s
            ))),
        }
    }
}

/// Anatomical CompCor configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompCorConfig {
    pub pre_filter: PreFilter,
    /// Cutoff period of the cosine high-pass, in seconds
    pub high_pass_cutoff: f64,
    pub criterion: ComponentCriterion,
    pub header_prefix: String,
    /// Leading non-steady-state volumes; detected from the series when unset
    pub skip_volumes: Option<usize>,
    /// Seconds; read from the series header when unset
    pub repetition_time: Option<f64>,
    /// Also write the pre-filter basis table
    pub save_pre_filter: bool,
}

impl Default for CompCorConfig {
    fn default() -> Self {
        Self {
            pre_filter: PreFilter::Cosine,
            high_pass_cutoff: 128.0,
            criterion: ComponentCriterion::default(),
            header_prefix: "a_comp_cor_".to_string(),
            skip_volumes: None,
            repetition_time: None,
            save_pre_filter: true,
        }
    }
}

/// Intermediate artifact caching
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_branch_erosions() {
        let roi = RoiConfig::default();
        assert_eq!(roi.wm.region, Erosion::Proportion(0.6));
        assert!(matches!(roi.wm.mask, Erosion::Proportion(p) if (p - 0.216).abs() < 1e-12));
        assert_eq!(roi.csf.mask, Erosion::Millimeters(30.0));
        assert_eq!(roi.threshold, 0.95);
    }

    #[test]
    fn test_erosion_parsing() {
        assert_eq!("none".parse::<Erosion>().unwrap(), Erosion::None);
        assert_eq!("mm:30".parse::<Erosion>().unwrap(), Erosion::Millimeters(30.0));
        assert_eq!("2.5mm".parse::<Erosion>().unwrap(), Erosion::Millimeters(2.5));
        assert_eq!(
            "proportion:0.6".parse::<Erosion>().unwrap(),
            Erosion::Proportion(0.6)
        );
        assert!("sideways".parse::<Erosion>().is_err());
    }

    #[test]
    fn test_criterion_parsing() {
        assert_eq!("6".parse::<ComponentCriterion>().unwrap(), ComponentCriterion::Count(6));
        assert_eq!(
            "0.7".parse::<ComponentCriterion>().unwrap(),
            ComponentCriterion::VarianceThreshold(0.7)
        );
        assert_eq!(
            "auto".parse::<ComponentCriterion>().unwrap(),
            ComponentCriterion::VarianceThreshold(0.5)
        );
        assert_eq!("all".parse::<ComponentCriterion>().unwrap(), ComponentCriterion::All);
        assert!("1.5".parse::<ComponentCriterion>().is_err());
    }

    #[test]
    fn test_tagged_enums_round_trip_through_toml() {
        let compcor = CompCorConfig {
            criterion: ComponentCriterion::VarianceThreshold(0.5),
            ..CompCorConfig::default()
        };
        let text = toml::to_string(&compcor).unwrap();
        let back: CompCorConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, compcor);
    }
}
