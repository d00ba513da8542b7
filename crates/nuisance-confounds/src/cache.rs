// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Content-addressed cache for intermediate ROIs.

Keys are xxh64 digests of a stage name, its parameters and the content
hashes of its inputs. Each key owns a `OnceCell`, so concurrent requests for
the same key run the computation once. With a working directory, computed
ROIs are also written as `{label}_{key}.nii.gz` and reused by later runs.
*/

use crate::error::{ConfoundError, ConfoundResult};
use nuisance_structures::{load_image, save_image, Roi};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use xxhash_rust::xxh64::Xxh64;

/// Digest identifying one cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn builder(stage: &str) -> CacheKeyBuilder {
        let mut hasher = Xxh64::new(0);
        hasher.update(stage.as_bytes());
        CacheKeyBuilder { hasher }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub struct CacheKeyBuilder {
    hasher: Xxh64,
}

impl CacheKeyBuilder {
    /// Mix in a named parameter through its `Debug` rendering
    pub fn param(mut self, name: &str, value: impl fmt::Debug) -> Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update(b"=");
        self.hasher.update(format!("{:?}", value).as_bytes());
        self.hasher.update(b";");
        self
    }

    /// Mix in the content hash of an input
    pub fn content(mut self, hash: u64) -> Self {
        self.hasher.update(&hash.to_le_bytes());
        self
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(self.hasher.digest())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_hits: u64,
    pub entries: usize,
}

#[derive(Default, Debug)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    disk_hits: AtomicU64,
}

#[derive(Debug)]
pub struct ArtifactCache {
    enabled: bool,
    work_dir: Option<PathBuf>,
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<Roi>>>>,
    counters: Counters,
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ArtifactCache {
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            work_dir: None,
            cells: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Cache that also persists artifacts under `work_dir`
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            ..Self::in_memory()
        }
    }

    /// Cache that always recomputes
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::in_memory()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Return the ROI stored under `key`, computing it at most once.
    ///
    /// Errors are not cached; a later call with the same key retries.
    pub fn get_or_compute<F>(&self, label: &str, key: CacheKey, compute: F) -> ConfoundResult<Roi>
    where
        F: FnOnce() -> ConfoundResult<Roi>,
    {
        if !self.enabled {
            return compute();
        }

        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(key).or_insert_with(|| Arc::new(OnceCell::new())))
        };
        if let Some(roi) = cell.get() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(target: "nuisance-confounds", "[CACHE] hit {} ({})", label, key);
            return Ok(roi.clone());
        }

        let mut initialised_here = false;
        let roi = cell.get_or_try_init(|| {
            initialised_here = true;
            if let Some(roi) = self.load_from_disk(label, key) {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(roi);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let roi = compute()?;
            self.store_on_disk(label, key, &roi);
            Ok::<Roi, ConfoundError>(roi)
        })?;
        if !initialised_here {
            // waited on another caller's initialisation
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(target: "nuisance-confounds", "[CACHE] hit {} ({}) after wait", label, key);
        }
        Ok(roi.clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            entries: self.cells.lock().values().filter(|c| c.get().is_some()).count(),
        }
    }

    /// Drop every in-memory entry. Files in the working directory stay.
    pub fn clear(&self) {
        self.cells.lock().clear();
    }

    fn artifact_path(&self, label: &str, key: CacheKey) -> Option<PathBuf> {
        self.work_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_{}.nii.gz", label, key)))
    }

    fn load_from_disk(&self, label: &str, key: CacheKey) -> Option<Roi> {
        let path = self.artifact_path(label, key)?;
        if !path.is_file() {
            return None;
        }
        match load_image(&path).and_then(|image| Roi::from_image(label, &image)) {
            Ok(roi) => {
                debug!(target: "nuisance-confounds", "[CACHE] reused {}", path.display());
                Some(roi)
            }
            Err(e) => {
                warn!(
                    target: "nuisance-confounds",
                    "[CACHE] ignoring unreadable artifact {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    fn store_on_disk(&self, label: &str, key: CacheKey, roi: &Roi) {
        let Some(path) = self.artifact_path(label, key) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(
                    target: "nuisance-confounds",
                    "[CACHE] cannot create {}: {}",
                    parent.display(),
                    e
                );
                return;
            }
        }
        if let Err(e) = save_image(&roi.to_image(), &path) {
            warn!(
                target: "nuisance-confounds",
                "[CACHE] failed to persist {}: {}",
                path.display(),
                e
            );
        }
    }
}
