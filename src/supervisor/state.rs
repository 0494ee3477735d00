//! Supervisor context shared by the worker threads.

use super::retry::{RemountRequest, RetryQueue};
use crate::config::SupervisorConfig;
use crate::registry::MigrationRegistry;
use crate::remount::Remounter;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

type ExitHook = Box<dyn Fn() + Send>;

/// Flags and retry queue guarded by the supervisor lock.
#[derive(Debug)]
pub struct SupervisorState {
    pub(super) exit: bool,
    pub(super) reassess: bool,
    pub(super) first_pass_done: bool,
    pub(super) retries: RetryQueue,
}

impl SupervisorState {
    pub fn is_exiting(&self) -> bool {
        self.exit
    }
}

/// Process-wide supervisor context.
///
/// One coarse lock guards the exit/reassess/first-pass flags and the remount
/// retry queue. `mtab_changed` is signalled only when the mount table may
/// have changed (or on exit, to release the waiter).
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Arc<dyn MigrationRegistry>,
    remounter: Arc<dyn Remounter>,
    state: Mutex<SupervisorState>,
    mtab_changed: Condvar,
    exit_hooks: Mutex<Vec<ExitHook>>,
}

impl Supervisor {
    /// The first assessment pass is pending from the start.
    pub fn new(
        config: SupervisorConfig,
        registry: Arc<dyn MigrationRegistry>,
        remounter: Arc<dyn Remounter>,
    ) -> Self {
        Self {
            config,
            registry,
            remounter,
            state: Mutex::new(SupervisorState {
                exit: false,
                reassess: true,
                first_pass_done: false,
                retries: RetryQueue::default(),
            }),
            mtab_changed: Condvar::new(),
            exit_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn MigrationRegistry> {
        &self.registry
    }

    pub(super) fn remounter(&self) -> &dyn Remounter {
        self.remounter.as_ref()
    }

    /// Take the supervisor lock. A poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `hook` once when exit is first requested, with the lock held.
    /// Used to wake threads blocked outside the condition variable.
    ///
    /// If exit has already been requested, `hook` runs before this returns.
    pub fn on_exit(&self, hook: impl Fn() + Send + 'static) {
        let state = self.lock();
        if state.exit {
            hook();
            return;
        }
        self.exit_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Set the exit flag and wake every blocked worker.
    pub fn request_exit(&self) {
        let mut state = self.lock();
        self.set_exit(&mut state);
    }

    pub(super) fn set_exit(&self, state: &mut SupervisorState) {
        if state.exit {
            return;
        }
        state.exit = true;
        self.mtab_changed.notify_all();
        for hook in self
            .exit_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            hook();
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.lock().exit
    }

    /// Record that the mount table changed. Returns false once exiting.
    pub fn notify_mount_change(&self) -> bool {
        let mut state = self.lock();
        if state.exit {
            return false;
        }
        state.reassess = true;
        self.mtab_changed.notify_all();
        true
    }

    /// Block until a reassessment is due or exit is requested.
    pub(super) fn wait_for_reassess<'a>(
        &self,
        mut state: MutexGuard<'a, SupervisorState>,
    ) -> MutexGuard<'a, SupervisorState> {
        while !state.reassess && !state.exit {
            state = self
                .mtab_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    /// Run one assessment pass on the calling thread.
    pub fn assess_now(&self) {
        let mut state = self.lock();
        self.assess(&mut state);
    }

    pub fn pending_remounts(&self) -> Vec<RemountRequest> {
        self.lock().retries.requests().to_vec()
    }

    pub fn first_pass_done(&self) -> bool {
        self.lock().first_pass_done
    }
}
