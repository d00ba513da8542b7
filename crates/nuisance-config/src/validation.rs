// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are within valid ranges and consistent with each other.
//! Every violation is collected so a user sees all problems at once.

use crate::{ComponentCriterion, ConfigError, ConfigResult, Erosion, NuisanceConfig};

/// Number of probability maps the combined region can draw from (WM, CSF)
const COMBINABLE_MAPS: usize = 2;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    OutOfRange { field: String, reason: String },
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { field, reason } => {
                write!(f, "{} is out of range: {}", field, reason)
            }
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Log level
/// - Probability threshold and erosion parameter ranges
/// - Combination indices
/// - Signal labels
/// - CompCor filter and retention parameters
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every violation
pub fn validate_config(config: &NuisanceConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_system(config, &mut errors);
    validate_roi(config, &mut errors);
    validate_combine(config, &mut errors);
    validate_signals(config, &mut errors);
    validate_compcor(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_erosion(field: &str, erosion: &Erosion, errors: &mut Vec<ConfigValidationError>) {
    match *erosion {
        Erosion::None => {}
        Erosion::Millimeters(mm) if !mm.is_finite() || mm < 0.0 => {
            errors.push(ConfigValidationError::OutOfRange {
                field: field.to_string(),
                reason: format!("erosion distance must be >= 0 mm, got {}", mm),
            });
        }
        Erosion::Proportion(p) if !(p > 0.0 && p <= 1.0) => {
            errors.push(ConfigValidationError::OutOfRange {
                field: field.to_string(),
                reason: format!("erosion proportion must be in (0, 1], got {}", p),
            });
        }
        _ => {}
    }
}

fn validate_system(config: &NuisanceConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.system.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "system.log_level".to_string(),
            reason: format!(
                "'{}' is not one of {}",
                config.system.log_level,
                LOG_LEVELS.join(", ")
            ),
        });
    }
}

fn validate_roi(config: &NuisanceConfig, errors: &mut Vec<ConfigValidationError>) {
    let roi = &config.roi;
    if !(roi.threshold > 0.0 && roi.threshold <= 1.0) {
        errors.push(ConfigValidationError::OutOfRange {
            field: "roi.threshold".to_string(),
            reason: format!("must be in (0, 1], got {}", roi.threshold),
        });
    }
    for (branch, erosion) in [("wm", &roi.wm), ("csf", &roi.csf), ("combined", &roi.combined)] {
        validate_erosion(&format!("roi.{}.region", branch), &erosion.region, errors);
        validate_erosion(&format!("roi.{}.mask", branch), &erosion.mask, errors);
    }
}

fn validate_combine(config: &NuisanceConfig, errors: &mut Vec<ConfigValidationError>) {
    let indices = &config.combine.indices;
    if indices.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "combine.indices".to_string(),
        });
    }
    for &index in indices {
        if index >= COMBINABLE_MAPS {
            errors.push(ConfigValidationError::OutOfRange {
                field: "combine.indices".to_string(),
                reason: format!("index {} exceeds the {} available maps", index, COMBINABLE_MAPS),
            });
        }
    }
}

fn validate_signals(config: &NuisanceConfig, errors: &mut Vec<ConfigValidationError>) {
    let labels = &config.signals.class_labels;
    if labels.len() != 2 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "signals.class_labels".to_string(),
            reason: format!("expected 2 labels (WM, CSF), got {}", labels.len()),
        });
    }
    if labels.iter().any(|l| l.trim().is_empty()) {
        errors.push(ConfigValidationError::MissingRequired {
            field: "signals.class_labels".to_string(),
        });
    }
    if labels.len() == 2 && labels[0] == labels[1] {
        errors.push(ConfigValidationError::InvalidValue {
            field: "signals.class_labels".to_string(),
            reason: format!("duplicate label '{}'", labels[0]),
        });
    }
}

fn validate_compcor(config: &NuisanceConfig, errors: &mut Vec<ConfigValidationError>) {
    let compcor = &config.compcor;
    if !(compcor.high_pass_cutoff.is_finite() && compcor.high_pass_cutoff > 0.0) {
        errors.push(ConfigValidationError::OutOfRange {
            field: "compcor.high_pass_cutoff".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    match compcor.criterion {
        ComponentCriterion::Count(0) => errors.push(ConfigValidationError::OutOfRange {
            field: "compcor.criterion".to_string(),
            reason: "component count must be at least 1".to_string(),
        }),
        ComponentCriterion::VarianceThreshold(f) if !(f > 0.0 && f <= 1.0) => {
            errors.push(ConfigValidationError::OutOfRange {
                field: "compcor.criterion".to_string(),
                reason: format!("variance fraction must be in (0, 1], got {}", f),
            })
        }
        _ => {}
    }
    if compcor.header_prefix.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "compcor.header_prefix".to_string(),
        });
    }
    if let Some(tr) = compcor.repetition_time {
        if !(tr.is_finite() && tr > 0.0) {
            errors.push(ConfigValidationError::OutOfRange {
                field: "compcor.repetition_time".to_string(),
                reason: format!("must be positive, got {}", tr),
            });
        }
    }
}
