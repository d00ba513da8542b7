// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization
//!
//! A console layer filtered by the debug flags, plus (with `file-logging`)
//! JSON files in a timestamped run folder with retention cleanup.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[cfg(feature = "file-logging")]
use anyhow::Context;
#[cfg(feature = "file-logging")]
use chrono::{NaiveDateTime, Utc};
#[cfg(feature = "file-logging")]
use tracing_appender::rolling;

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Keeps file writers alive; logs are flushed when it is dropped.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// The run folder, when file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize logging
///
/// With a `log_dir` configured, creates:
/// ```text
/// {log_dir}/
///   └── run_20250101_120000/
///       ├── nuisance-confounds.log
///       ├── nuisance-structures.log
///       └── nuisance.log (combined)
/// ```
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(debug_flags: &CrateDebugFlags, config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&config.level);
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = tracing_subscriber::fmt::layer()
        .with_target(debug_flags.any_enabled())
        .with_file(false)
        .with_line_number(false);
    let console_layer = match config.format {
        LogFormat::Text => console.with_filter(EnvFilter::new(&filter)).boxed(),
        LogFormat::Json => console.json().with_filter(EnvFilter::new(&filter)).boxed(),
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let (file_guards, run_folder) = match &config.log_dir {
        Some(base_log_dir) => {
            let run_folder = create_run_folder(base_log_dir)?;
            cleanup_old_logs(base_log_dir, config.retention_days, config.retention_runs)?;
            let guards = add_file_layers(&run_folder, &filter, &mut layers);
            (guards, Some(run_folder))
        }
        None => (Vec::new(), None),
    };
    #[cfg(not(feature = "file-logging"))]
    let run_folder: Option<PathBuf> = None;

    Registry::default().with(layers).try_init()?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Console-only logging at the configured default level
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(debug_flags, &LoggingConfig::default())
}

#[cfg(feature = "file-logging")]
fn create_run_folder(base_log_dir: &Path) -> Result<PathBuf> {
    let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = base_log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

/// One JSON file per known crate plus a combined file.
#[cfg(feature = "file-logging")]
fn add_file_layers(
    run_folder: &Path,
    filter: &str,
    layers: &mut Vec<BoxedLayer>,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    let mut guards = Vec::new();
    let mut add = |file_name: String, directive: String| {
        let (writer, guard) = tracing_appender::non_blocking(rolling::never(run_folder, file_name));
        guards.push(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(directive))
                .boxed(),
        );
    };
    for crate_name in crate::KNOWN_CRATES {
        add(
            format!("{}.log", crate_name),
            format!("{}=debug,off", crate_name),
        );
    }
    add("nuisance.log".to_string(), filter.to_string());
    guards
}

/// Remove run folders older than `retention_days`, then trim to the most
/// recent `retention_runs`.
#[cfg(feature = "file-logging")]
fn cleanup_old_logs(base_log_dir: &Path, retention_days: u64, retention_runs: usize) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }
    let cutoff = Utc::now().naive_utc() - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(RUN_PREFIX))
            .and_then(|s| NaiveDateTime::parse_from_str(s, RUN_TIMESTAMP_FORMAT).ok());
        if let Some(stamp) = stamp {
            runs.push((path, stamp));
        }
    }
    // Newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    for (index, (path, stamp)) in runs.iter().enumerate() {
        if *stamp < cutoff || index >= retention_runs {
            if let Err(e) = std::fs::remove_dir_all(path) {
                tracing::warn!(
                    target: "nuisance",
                    "Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(())
}
