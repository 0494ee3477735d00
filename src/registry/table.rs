//! In-process Migration Registry.

use super::{MigrationRegistry, MigrationStat, StartOutcome};
use crate::error::{RegistryError, RegistryResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
struct TrackedMigration {
    started: Instant,
    xferred: u64,
    remaining: u64,
    errors: i32,
    complete: bool,
}

#[derive(Debug, Default)]
struct Inner {
    migrations: BTreeMap<String, TrackedMigration>,
    stopped: bool,
}

/// Registry table keyed by dataset name.
///
/// Migration workers report through [`MigrationTable::record_progress`] and
/// [`MigrationTable::mark_complete`]; the supervisor drives the
/// [`MigrationRegistry`] operations.
#[derive(Debug)]
pub struct MigrationTable {
    service_id: String,
    limit: usize,
    inner: Mutex<Inner>,
}

impl MigrationTable {
    /// Initialise a registry for `service_id` holding at most `limit` datasets.
    pub fn new(service_id: impl Into<String>, limit: usize) -> Self {
        Self {
            service_id: service_id.into(),
            limit,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the counters of a migrating dataset.
    ///
    /// Counters only move forward; a report that would shrink `xferred` or
    /// `errors` is clamped. Returns false if the dataset is not tracked.
    pub fn record_progress(&self, dataset: &str, xferred: u64, remaining: u64, errors: i32) -> bool {
        let mut inner = self.lock();
        match inner.migrations.get_mut(dataset) {
            Some(m) => {
                m.xferred = m.xferred.max(xferred);
                m.remaining = remaining;
                m.errors = m.errors.max(errors);
                true
            }
            None => false,
        }
    }

    /// Flag a dataset's migration as finished.
    pub fn mark_complete(&self, dataset: &str) -> bool {
        let mut inner = self.lock();
        match inner.migrations.get_mut(dataset) {
            Some(m) => {
                m.remaining = 0;
                m.complete = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.lock().migrations.contains_key(dataset)
    }

    /// Tracked dataset names in order.
    pub fn datasets(&self) -> Vec<String> {
        self.lock().migrations.keys().cloned().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

impl MigrationRegistry for MigrationTable {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn start(
        &self,
        dataset: &str,
        mountpoint: &Path,
        options: &str,
    ) -> RegistryResult<StartOutcome> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(RegistryError::Stopped {
                service: self.service_id.clone(),
            });
        }
        if inner.migrations.contains_key(dataset) {
            return Ok(StartOutcome::AlreadyTracked);
        }
        if inner.migrations.len() >= self.limit {
            return Err(RegistryError::Exhausted { limit: self.limit });
        }

        inner.migrations.insert(
            dataset.to_string(),
            TrackedMigration {
                started: Instant::now(),
                xferred: 0,
                remaining: 0,
                errors: 0,
                complete: false,
            },
        );
        debug!(dataset, mountpoint = %mountpoint.display(), options, "Tracking migration");
        Ok(StartOutcome::Created)
    }

    fn cancel(&self, dataset: &str) -> RegistryResult<bool> {
        let removed = self.lock().migrations.remove(dataset).is_some();
        if removed {
            debug!(dataset, "Cancelled migration");
        }
        Ok(removed)
    }

    fn count(&self) -> usize {
        self.lock().migrations.len()
    }

    fn retain(&self, keep: &mut dyn FnMut(&str) -> bool) -> Vec<String> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        inner.migrations.retain(|name, _| {
            let kept = keep(name);
            if !kept {
                removed.push(name.clone());
            }
            kept
        });
        removed
    }

    fn status_all(&self) -> RegistryResult<Vec<MigrationStat>> {
        let inner = self.lock();
        Ok(inner
            .migrations
            .iter()
            .map(|(name, m)| MigrationStat {
                dataset: name.clone(),
                xferred: m.xferred,
                remaining: m.remaining,
                errors: m.errors,
                elapsed: m.started.elapsed().as_secs(),
                complete: m.complete,
            })
            .collect())
    }

    fn stop_all(&self) {
        let mut inner = self.lock();
        if !inner.stopped {
            info!(service = %self.service_id, tracked = inner.migrations.len(), "Stopping all migrations");
        }
        inner.stopped = true;
    }

    fn refresh(&self) -> RegistryResult<()> {
        let mut inner = self.lock();
        inner.stopped = false;
        info!(service = %self.service_id, "Migration service refreshed");
        Ok(())
    }
}
