//! Migration Registry contract.
//!
//! The registry owns the table of datasets under migration together with the
//! workers that copy their data in. The supervisor only starts, cancels and
//! prunes entries; counters are mutated by registry-owned workers alone.

mod table;

pub use table::MigrationTable;

use crate::error::RegistryResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Point-in-time progress counters of one migrating dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStat {
    pub dataset: String,
    /// Bytes copied in so far
    pub xferred: u64,
    /// Bytes still to copy
    pub remaining: u64,
    pub errors: i32,
    /// Seconds since migration started
    pub elapsed: u64,
    pub complete: bool,
}

/// Whether `start` created a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Created,
    AlreadyTracked,
}

/// Operations the supervisor consumes from the Migration Registry.
///
/// Every method is atomic with respect to the registry's own workers:
/// implementations bracket iteration and snapshots with their internal lock.
pub trait MigrationRegistry: Send + Sync {
    /// Service identity the registry was initialised with.
    fn service_id(&self) -> &str;

    /// Begin (or keep) migrating `dataset`.
    fn start(&self, dataset: &str, mountpoint: &Path, options: &str)
        -> RegistryResult<StartOutcome>;

    /// Stop migrating `dataset`. Returns true if an entry was removed.
    fn cancel(&self, dataset: &str) -> RegistryResult<bool>;

    /// Number of tracked datasets.
    fn count(&self) -> usize;

    /// Remove every entry for which `keep` returns false, under the
    /// registry lock. Returns the removed dataset names.
    fn retain(&self, keep: &mut dyn FnMut(&str) -> bool) -> Vec<String>;

    /// Snapshot the counters of every tracked dataset.
    fn status_all(&self) -> RegistryResult<Vec<MigrationStat>>;

    /// Stop all migration work.
    fn stop_all(&self);

    /// Reload service configuration.
    fn refresh(&self) -> RegistryResult<()>;
}
