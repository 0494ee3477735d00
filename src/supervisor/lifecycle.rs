//! Daemon lifecycle: spawning the workers, mapping signals to shutdown,
//! refresh and abort, and joining everything on the way out.

use super::state::Supervisor;
use super::watcher::{spawn_watcher, ChangeSource, MountTableWatcher};
use super::waiter::spawn_waiter;
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::registry::MigrationTable;
use crate::remount::CommandRemounter;
use crate::stats::{spawn_publisher, ListenerTransport, SysvTransport};
use anyhow::{Context, Result};
use fs2::FileExt;
use nix::sys::signal::{kill, signal, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// The three long-lived workers of a running supervisor.
pub struct RunningDaemon {
    supervisor: Arc<Supervisor>,
    watcher: Option<JoinHandle<()>>,
    waiter: Option<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
}

impl RunningDaemon {
    /// Spawn the Event Watcher, Assessment Waiter and Stat Publisher.
    ///
    /// If a thread cannot be spawned, the ones already running are stopped
    /// and joined before the error is returned.
    pub fn spawn(
        supervisor: Arc<Supervisor>,
        source: Box<dyn ChangeSource>,
        transport: Arc<dyn ListenerTransport>,
    ) -> Result<Self> {
        let interrupt = source.interrupter();
        supervisor.on_exit(move || interrupt.fire());

        let mut daemon = Self {
            supervisor: Arc::clone(&supervisor),
            watcher: None,
            waiter: None,
            publisher: None,
        };

        let spawned = (|| -> std::io::Result<()> {
            daemon.watcher = Some(spawn_watcher(Arc::clone(&supervisor), source)?);
            daemon.waiter = Some(spawn_waiter(Arc::clone(&supervisor))?);
            daemon.publisher = Some(spawn_publisher(Arc::clone(&supervisor), transport)?);
            Ok(())
        })();

        if let Err(e) = spawned {
            daemon.shutdown();
            daemon.join();
            return Err(e).context("Failed to spawn supervisor thread");
        }
        Ok(daemon)
    }

    /// Begin graceful shutdown: set the exit flag and wake every worker.
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.supervisor.request_exit();
    }

    /// Ask the registry to reload its configuration; shut down if it cannot.
    pub fn refresh(&self) -> Result<(), SupervisorError> {
        let registry = self.supervisor.registry();
        info!(service = registry.service_id(), "Refreshing migration service");
        if let Err(e) = registry.refresh() {
            error!("{e}");
            self.shutdown();
            return Err(e.into());
        }
        Ok(())
    }

    /// Join the workers in a fixed order: watcher, waiter, publisher. There
    /// is no timeout.
    pub fn join(mut self) {
        for (name, handle) in [
            ("watcher", self.watcher.take()),
            ("waiter", self.waiter.take()),
            ("publisher", self.publisher.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(worker = name, "Worker thread panicked");
                }
            }
        }
        self.supervisor.registry().stop_all();
        debug!("All workers joined");
    }
}

/// Ignore refresh and quit signals until the signal loop is ready for them.
pub fn ignore_startup_signals() -> nix::Result<()> {
    // SAFETY: installing SIG_IGN runs no handler code.
    unsafe {
        signal(Signal::SIGHUP, SigHandler::SigIgn)?;
        signal(Signal::SIGQUIT, SigHandler::SigIgn)?;
    }
    Ok(())
}

/// Run the supervisor until a terminate signal arrives.
///
/// Fatal startup failures return before any worker thread exists.
pub fn run(config: SupervisorConfig) -> Result<()> {
    let _pid_lock = match &config.pid_file {
        Some(path) => Some(lock_pid_file(path)?),
        None => None,
    };

    let mut signals = SigSet::empty();
    for sig in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP, Signal::SIGQUIT] {
        signals.add(sig);
    }
    // Workers inherit the mask, so only the main flow receives these.
    signals
        .thread_block()
        .context("Failed to block supervisor signals")?;

    fs::create_dir_all(&config.status_dir).with_context(|| {
        format!(
            "Failed to create status directory {}",
            config.status_dir.display()
        )
    })?;

    let registry = Arc::new(MigrationTable::new(
        config.service_id.clone(),
        config.max_migrations,
    ));
    let remounter = CommandRemounter::new(&config.remount.command, config.remount_timeout())
        .context("Remount command is empty")?;
    let source = MountTableWatcher::new(&config.mount_table)
        .context("Failed to watch mount table")?;
    let transport = Arc::new(SysvTransport::new(config.ipc_project_id));

    info!(
        service = %config.service_id,
        mount_table = %config.mount_table.display(),
        status_dir = %config.status_dir.display(),
        interval_secs = config.publish_interval_secs,
        "Starting shadow migration supervisor"
    );

    let supervisor = Arc::new(Supervisor::new(config, registry, Arc::new(remounter)));

    // Exit requested from inside (watcher failure, exhaustion) must reach
    // the signal loop below, including exits during the first pass.
    supervisor.on_exit(|| {
        let _ = kill(Pid::this(), Signal::SIGTERM);
    });
    let daemon = RunningDaemon::spawn(supervisor, Box::new(source), transport)?;

    // Startup window over: refresh and quit are now queued for sigwait.
    // SAFETY: restoring the default disposition runs no handler code.
    unsafe {
        signal(Signal::SIGHUP, SigHandler::SigDfl).context("Failed to restore SIGHUP")?;
        signal(Signal::SIGQUIT, SigHandler::SigDfl).context("Failed to restore SIGQUIT")?;
    }

    loop {
        match signals.wait() {
            Ok(Signal::SIGTERM) | Ok(Signal::SIGINT) => {
                daemon.shutdown();
                break;
            }
            Ok(Signal::SIGHUP) => {
                if daemon.refresh().is_err() {
                    break;
                }
            }
            Ok(Signal::SIGQUIT) => {
                error!("Quit requested, aborting");
                std::process::abort();
            }
            Ok(other) => debug!(signal = ?other, "Ignoring signal"),
            Err(e) => {
                warn!("Signal wait failed: {e}");
                daemon.shutdown();
                break;
            }
        }
    }

    daemon.join();
    info!("Supervisor stopped");
    Ok(())
}

/// Take an exclusive lock on `path` and record our PID in it.
fn lock_pid_file(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open PID file {}", path.display()))?;
    FileExt::try_lock_exclusive(&file)
        .with_context(|| format!("Another supervisor holds {}", path.display()))?;
    file.set_len(0)
        .with_context(|| format!("Failed to truncate PID file {}", path.display()))?;
    writeln!(file, "{}", std::process::id())
        .with_context(|| format!("Failed to write PID file {}", path.display()))?;
    Ok(file)
}
