//! Assessment Waiter: runs the Assessment Engine whenever the mount table
//! may have changed.

use super::state::Supervisor;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

pub(super) fn spawn_waiter(supervisor: Arc<Supervisor>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("assess-waiter".to_string())
        .spawn(move || run_waiter(&supervisor))
}

/// Wait (lock released), assess (lock held), repeat until exit.
pub(super) fn run_waiter(supervisor: &Supervisor) {
    let mut state = supervisor.lock();
    loop {
        state = supervisor.wait_for_reassess(state);
        supervisor.assess(&mut state);
        if state.exit {
            break;
        }
    }
    drop(state);
    info!("Assessment waiter stopped");
}
