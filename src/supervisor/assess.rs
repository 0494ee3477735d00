//! Assessment Engine: one reconciliation pass of the mount table against
//! the Migration Registry.

use super::state::{Supervisor, SupervisorState};
use crate::mount::{MountEntry, MountTable, ShadowMode};
use crate::registry::StartOutcome;
use crate::remount::RemountOutcome;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

impl Supervisor {
    /// Run one pass. The caller holds the supervisor lock; it is still held
    /// on every return path.
    ///
    /// Every registry entry whose dataset is not shadow-mounted in this
    /// snapshot of the table is removed at the end of the pass, which picks
    /// up completions and unmounts the per-record handling does not see.
    pub(super) fn assess(&self, state: &mut SupervisorState) {
        let registry = self.registry();

        if state.exit {
            registry.stop_all();
            return;
        }

        let mount_table = &self.config().mount_table;
        let table = match MountTable::read(mount_table) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %mount_table.display(), "Cannot open mount table, retrying on next change: {e}");
                // The next change event retries; the first pass stays pending.
                state.reassess = false;
                return;
            }
        };

        let first_pass = !state.first_pass_done;
        let before = registry.count();
        let mut shadowed: HashSet<&str> = HashSet::new();
        let mut created = 0usize;

        for entry in table.entries() {
            if state.exit {
                break;
            }
            if entry.fs_type().is_none() {
                continue;
            }

            let dataset = entry.special.as_str();
            let Some(mode) = entry.shadow_mode() else {
                self.cancel_migration(dataset);
                continue;
            };
            shadowed.insert(dataset);

            if mode == ShadowMode::Standby {
                if !first_pass {
                    continue;
                }
                match self.remounter().remount(dataset) {
                    RemountOutcome::Remounted => {
                        info!(dataset, "Promoted standby mount to active");
                    }
                    RemountOutcome::NoSuchDataset => {
                        debug!(dataset, "Standby dataset vanished before promotion");
                        continue;
                    }
                    RemountOutcome::Failed => {
                        info!(dataset, "Remote source unavailable, will retry remount");
                        if let Err(e) = state.retries.add(dataset) {
                            error!(dataset, "{e}; shutting down");
                            self.set_exit(state);
                        }
                        continue;
                    }
                }
            }

            if self.start_migration(entry, state) {
                created += 1;
            }
        }

        let mut promoted = Vec::new();
        if !first_pass && !state.exit {
            promoted = state.retries.attempt_all(self.remounter());
        }
        for dataset in &promoted {
            debug!(dataset = %dataset, "Waiting for the remount to reach the mount table");
        }

        // An interrupted scan saw only part of the table; sweeping against it
        // would drop datasets that are still mounted.
        let removed = if state.exit {
            Vec::new()
        } else {
            registry.retain(&mut |name| shadowed.contains(name))
        };
        for dataset in &removed {
            info!(dataset = %dataset, "No longer shadow-mounted, stopped tracking");
        }

        debug!(
            first_pass,
            before,
            created,
            promoted = promoted.len(),
            removed = removed.len(),
            tracked = registry.count(),
            pending_remounts = state.retries.len(),
            "Assessment pass complete"
        );

        state.reassess = false;
        state.first_pass_done = true;
    }

    /// Returns true if a new registry entry was created.
    fn start_migration(&self, entry: &MountEntry, state: &mut SupervisorState) -> bool {
        let dataset = entry.special.as_str();
        match self
            .registry()
            .start(dataset, &entry.mountpoint, &entry.options)
        {
            Ok(StartOutcome::Created) => {
                info!(dataset, mountpoint = %entry.mountpoint.display(), "Migration started");
                true
            }
            Ok(StartOutcome::AlreadyTracked) => false,
            Err(e) if e.is_exhaustion() => {
                error!(dataset, "{e}; shutting down");
                self.set_exit(state);
                false
            }
            Err(e) => {
                warn!(dataset, "Failed to start migration: {e}");
                false
            }
        }
    }

    fn cancel_migration(&self, dataset: &str) {
        match self.registry().cancel(dataset) {
            Ok(true) => info!(dataset, "Shadow option gone, migration cancelled"),
            Ok(false) => {}
            Err(e) => warn!(dataset, "Failed to cancel migration: {e}"),
        }
    }
}
