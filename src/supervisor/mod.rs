//! The supervisor core: shared context, Assessment Engine, remount retry
//! queue, and the worker threads that drive them.

mod assess;
mod lifecycle;
mod retry;
mod state;
mod waiter;
mod watcher;


pub use lifecycle::{ignore_startup_signals, run, RunningDaemon};
pub use retry::{RemountRequest, RetryQueue, MAX_REMOUNT_TRIES};
pub use state::{Supervisor, SupervisorState};
pub use watcher::{Change, ChangeSource, MountTableWatcher, WatchInterrupt};
