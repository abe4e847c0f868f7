//! Supplier Match Cache
//!
//! In-process index over the mirrored supplier directory. Lookups run against
//! an immutable [`SupplierIndex`] snapshot; refreshes build a new index off to
//! the side and swap the `Arc` in one write, so a reader sees either the old
//! or the new snapshot and never a mix.
//!
//! The sync collaborator is the only writer. It calls [`SupplierCache::replace_snapshot`]
//! for a full refresh or [`SupplierCache::upsert`] for incremental changes.

pub mod index;

pub use index::{
    SupplierIndex, CONTAINS_MAX_CONFIDENCE, CONTAINS_MIN_CONFIDENCE, PREFIX_CONFIDENCE,
    SINGLE_WORD_PENALTY,
};

use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{CachedSupplier, MatchResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared handle to the supplier snapshot
#[derive(Debug, Default)]
pub struct SupplierCache {
    /// Current snapshot; `None` until the first load
    current: RwLock<Option<Arc<SupplierIndex>>>,
    /// Incremented on every swap
    version: AtomicU64,
    /// Serializes writers so upserts never lose each other's changes
    writer: Mutex<()>,
}

impl SupplierCache {
    /// Create an unloaded cache; lookups report unavailable until a snapshot is loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache already loaded with `suppliers`
    pub fn with_suppliers(suppliers: Vec<CachedSupplier>) -> Self {
        let cache = Self::new();
        cache.swap(Arc::new(SupplierIndex::build(suppliers)));
        cache
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ResolutionResult<Arc<SupplierIndex>> {
        let guard = self
            .current
            .read()
            .map_err(|_| ResolutionError::CacheUnavailable("snapshot lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| ResolutionError::CacheUnavailable("no snapshot loaded".to_string()))
    }

    /// Look up a payee name, reporting an unavailable cache as an error
    pub fn try_lookup(&self, name: &str) -> ResolutionResult<MatchResult> {
        Ok(self.snapshot()?.lookup(name))
    }

    /// Look up a payee name; an unavailable cache yields NONE
    pub fn lookup(&self, name: &str) -> MatchResult {
        self.try_lookup(name).unwrap_or_else(|_| MatchResult::none())
    }

    /// True once a snapshot has been loaded
    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// Snapshot version (0 before the first load)
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replace the whole supplier set
    ///
    /// Returns the new snapshot version.
    pub fn replace_snapshot(&self, suppliers: Vec<CachedSupplier>) -> ResolutionResult<u64> {
        let _writer = self.lock_writer()?;
        let started = Instant::now();
        let index = SupplierIndex::build(suppliers);
        let count = index.len();
        let version = self.swap(Arc::new(index));

        info!(
            version,
            suppliers = count,
            build_ms = started.elapsed().as_millis() as u64,
            "Supplier snapshot replaced"
        );
        Ok(version)
    }

    /// Insert or update suppliers by `supplier_id`
    ///
    /// Returns the new snapshot version.
    pub fn upsert(&self, suppliers: Vec<CachedSupplier>) -> ResolutionResult<u64> {
        let _writer = self.lock_writer()?;
        let base: Vec<CachedSupplier> = match self.snapshot() {
            Ok(index) => index.suppliers().to_vec(),
            Err(_) => Vec::new(),
        };

        let changed = suppliers.len();
        let mut by_id: HashMap<String, CachedSupplier> = base
            .into_iter()
            .map(|s| (s.supplier_id.clone(), s))
            .collect();
        for supplier in suppliers {
            by_id.insert(supplier.supplier_id.clone(), supplier);
        }

        let mut merged: Vec<CachedSupplier> = by_id.into_values().collect();
        merged.sort_by(|a, b| a.supplier_id.cmp(&b.supplier_id));
        let index = SupplierIndex::build(merged);
        let count = index.len();
        let version = self.swap(Arc::new(index));

        debug!(version, changed, suppliers = count, "Supplier snapshot upserted");
        Ok(version)
    }

    /// Load a JSON array of suppliers and replace the snapshot with it
    ///
    /// Returns the number of suppliers indexed.
    pub fn load_snapshot_file(&self, path: &Path) -> ResolutionResult<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResolutionError::CacheUnavailable(format!(
                "Failed to read supplier snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        let suppliers: Vec<CachedSupplier> = serde_json::from_str(&content)?;
        self.replace_snapshot(suppliers)?;
        Ok(self.snapshot()?.len())
    }

    fn lock_writer(&self) -> ResolutionResult<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| ResolutionError::CacheUnavailable("writer lock poisoned".to_string()))
    }

    fn swap(&self, index: Arc<SupplierIndex>) -> u64 {
        match self.current.write() {
            Ok(mut guard) => *guard = Some(index),
            Err(poisoned) => {
                warn!("Supplier snapshot lock was poisoned; recovering with new snapshot");
                *poisoned.into_inner() = Some(index);
                self.current.clear_poison();
            }
        }
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}
