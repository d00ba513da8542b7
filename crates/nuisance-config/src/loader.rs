// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Configuration is resolved in three tiers:
//! 1. TOML file (base values, anything missing takes the built-in default)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, NuisanceConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const CONFIG_FILE_NAME: &str = "nuisance_configuration.toml";

/// Find the configuration file
///
/// Search order:
/// 1. `NUISANCE_CONFIG_PATH` environment variable
/// 2. Current working directory: `./nuisance_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("NUISANCE_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by NUISANCE_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet NUISANCE_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if the config file is not found, contains invalid TOML, or
/// an override cannot be parsed
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<NuisanceConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: NuisanceConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config)?;
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Set one dotted-key value. Keys match the TOML layout with dots replaced by
/// underscores, e.g. `compcor_high_pass_cutoff`.
fn apply_override(config: &mut NuisanceConfig, key: &str, value: &str) -> ConfigResult<bool> {
    match key {
        "system_max_threads" => config.system.max_threads = parse(key, value)?,
        "system_log_level" | "log_level" => config.system.log_level = value.to_string(),
        "system_work_dir" | "work_dir" => config.system.work_dir = Some(PathBuf::from(value)),
        "roi_threshold" => config.roi.threshold = parse(key, value)?,
        "roi_connectivity" => config.roi.connectivity = value.parse()?,
        "roi_wm_region" => config.roi.wm.region = value.parse()?,
        "roi_wm_mask" => config.roi.wm.mask = value.parse()?,
        "roi_csf_region" => config.roi.csf.region = value.parse()?,
        "roi_csf_mask" => config.roi.csf.mask = value.parse()?,
        "roi_combined_region" => config.roi.combined.region = value.parse()?,
        "roi_combined_mask" => config.roi.combined.mask = value.parse()?,
        "combine_method" => config.combine.method = value.parse()?,
        "combine_indices" => {
            config.combine.indices = value
                .split(',')
                .map(|index| parse(key, index))
                .collect::<ConfigResult<Vec<usize>>>()?
        }
        "compcor_pre_filter" => config.compcor.pre_filter = value.parse()?,
        "compcor_high_pass_cutoff" => config.compcor.high_pass_cutoff = parse(key, value)?,
        "compcor_criterion" | "compcor_components" => config.compcor.criterion = value.parse()?,
        "compcor_header_prefix" => config.compcor.header_prefix = value.to_string(),
        "compcor_skip_volumes" => config.compcor.skip_volumes = Some(parse(key, value)?),
        "compcor_repetition_time" | "repetition_time" => {
            config.compcor.repetition_time = Some(parse(key, value)?)
        }
        "compcor_save_pre_filter" => config.compcor.save_pre_filter = parse_bool(value),
        "cache_enabled" => config.cache.enabled = parse_bool(value),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Apply environment variable overrides to configuration
///
/// Every key accepted by [`apply_cli_overrides`] is also read from the
/// environment as `NUISANCE_{KEY}` in upper case, e.g.
/// `NUISANCE_COMPCOR_HIGH_PASS_CUTOFF` or `NUISANCE_ROI_CSF_MASK=mm:20`.
pub fn apply_environment_overrides(config: &mut NuisanceConfig) -> ConfigResult<()> {
    for (name, value) in env::vars() {
        let Some(key) = name.strip_prefix("NUISANCE_") else {
            continue;
        };
        // Handled by find_config_file and the observability crate
        if key == "CONFIG_PATH" || key == "DEBUG" {
            continue;
        }
        apply_override(config, &key.to_lowercase(), &value)?;
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"roi_threshold": "0.9", "compcor_components": "auto"}`)
///
/// Unknown keys are ignored so a caller can pass its full argument map.
pub fn apply_cli_overrides(
    config: &mut NuisanceConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    // Sorted so a failing key is reported deterministically
    let mut keys: Vec<&String> = cli_args.keys().collect();
    keys.sort();
    for key in keys {
        apply_override(config, key, &cli_args[key])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentCriterion, Erosion};
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("NUISANCE_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("NUISANCE_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("NUISANCE_CONFIG_PATH", "/no/such/nuisance_configuration.toml");
        let result = find_config_file();
        env::remove_var("NUISANCE_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nuisance_configuration.toml");

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[system]").unwrap();
        writeln!(file, "max_threads = 4").unwrap();
        writeln!(file, "[roi.csf]").unwrap();
        writeln!(file, "region = {{ kind = \"none\" }}").unwrap();
        writeln!(file, "mask = {{ kind = \"millimeters\", value = 20.0 }}").unwrap();
        writeln!(file, "[compcor]").unwrap();
        writeln!(file, "criterion = {{ kind = \"all\" }}").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.system.max_threads, 4);
        assert_eq!(config.roi.csf.region, Erosion::None);
        assert_eq!(config.roi.csf.mask, Erosion::Millimeters(20.0));
        assert_eq!(config.compcor.criterion, ComponentCriterion::All);
        // Untouched sections keep their defaults
        assert_eq!(config.compcor.high_pass_cutoff, 128.0);
        assert_eq!(config.combine.indices, vec![0, 1]);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nuisance_configuration.toml");
        fs::write(&config_path, "[roi\nthreshold = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = NuisanceConfig::default();

        env::set_var("NUISANCE_ROI_THRESHOLD", "0.9");
        env::set_var("NUISANCE_COMPCOR_CRITERION", "auto");
        let result = apply_environment_overrides(&mut config);
        env::remove_var("NUISANCE_ROI_THRESHOLD");
        env::remove_var("NUISANCE_COMPCOR_CRITERION");

        result.unwrap();
        assert_eq!(config.roi.threshold, 0.9);
        assert_eq!(
            config.compcor.criterion,
            ComponentCriterion::VarianceThreshold(0.5)
        );
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = NuisanceConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("combine_indices".to_string(), "1".to_string());
        cli_args.insert("roi_wm_mask".to_string(), "mm:6".to_string());
        cli_args.insert("unrelated_flag".to_string(), "x".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.combine.indices, vec![1]);
        assert_eq!(config.roi.wm.mask, Erosion::Millimeters(6.0));
    }

    #[test]
    fn test_bad_override_value_is_rejected() {
        let mut config = NuisanceConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("compcor_skip_volumes".to_string(), "-3".to_string());

        let result = apply_cli_overrides(&mut config, &cli_args);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nuisance_configuration.toml");

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[compcor]").unwrap();
        writeln!(file, "header_prefix = \"file_\"").unwrap();
        writeln!(file, "high_pass_cutoff = 100.0").unwrap();

        env::set_var("NUISANCE_COMPCOR_HEADER_PREFIX", "env_");
        env::set_var("NUISANCE_COMPCOR_HIGH_PASS_CUTOFF", "90");

        let mut cli_args = HashMap::new();
        cli_args.insert("compcor_header_prefix".to_string(), "cli_".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args));

        env::remove_var("NUISANCE_COMPCOR_HEADER_PREFIX");
        env::remove_var("NUISANCE_COMPCOR_HIGH_PASS_CUTOFF");

        // CLI wins for the prefix, env wins for the cutoff (no CLI override)
        let config = config.unwrap();
        assert_eq!(config.compcor.header_prefix, "cli_");
        assert_eq!(config.compcor.high_pass_cutoff, 90.0);
    }
}
