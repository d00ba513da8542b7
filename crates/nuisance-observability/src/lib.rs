// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # nuisance-observability
//!
//! Logging initialization shared by the nuisance crates, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: JSON log files in a timestamped run folder (default)

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Crate names (and tracing targets) that accept debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "nuisance",
    "nuisance-structures",
    "nuisance-confounds",
    "nuisance-config",
];
