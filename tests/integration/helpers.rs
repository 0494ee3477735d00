//! Shared test helpers for supervisor integration tests

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use shadowd::config::SupervisorConfig;
use shadowd::error::{ChannelError, ChannelResult};
use shadowd::registry::MigrationTable;
use shadowd::remount::{RemountOutcome, Remounter};
use shadowd::stats::{ListenerChannel, ListenerTransport, QueueStats, StatusMessage};
use shadowd::supervisor::Supervisor;

pub const STANDBY_DS1: &str = "tank/ds1 /tank/ds1 zfs rw,shadow=standby 0 0\n";
pub const ACTIVE_DS1: &str = "tank/ds1 /tank/ds1 zfs rw,shadow=active 0 0\n";

/// Remounter simulating a remote source that is reachable or not.
///
/// A successful remount rewrites the dataset's line in the mount table from
/// `shadow=standby` to `shadow=active`, the way the real filesystem would.
pub struct FakeRemounter {
    mount_table: PathBuf,
    reachable: AtomicBool,
    missing: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeRemounter {
    pub fn new(mount_table: &Path) -> Self {
        Self {
            mount_table: mount_table.to_path_buf(),
            reachable: AtomicBool::new(false),
            missing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_missing(&self, dataset: &str) {
        self.missing.lock().unwrap().push(dataset.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Remounter for FakeRemounter {
    fn remount(&self, dataset: &str) -> RemountOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().unwrap().iter().any(|d| d == dataset) {
            return RemountOutcome::NoSuchDataset;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return RemountOutcome::Failed;
        }

        let table = fs::read_to_string(&self.mount_table).unwrap_or_default();
        let prefix = format!("{dataset} ");
        let rewritten: String = table
            .lines()
            .map(|line| {
                if line.starts_with(&prefix) {
                    line.replace("shadow=standby", "shadow=active")
                } else {
                    line.to_string()
                }
            })
            .map(|line| line + "\n")
            .collect();
        if fs::write(&self.mount_table, rewritten).is_err() {
            return RemountOutcome::Failed;
        }
        RemountOutcome::Remounted
    }
}

/// A supervisor over a mount table in a temporary directory.
pub struct TestSupervisor {
    pub temp: TempDir,
    pub mount_table: PathBuf,
    pub registry: Arc<MigrationTable>,
    pub remounter: Arc<FakeRemounter>,
    pub supervisor: Arc<Supervisor>,
}

impl TestSupervisor {
    pub fn new(table: &str) -> Self {
        Self::with_config(table, |_| {})
    }

    pub fn with_config(table: &str, adjust: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let mount_table = temp.path().join("mtab");
        let status_dir = temp.path().join("status");
        fs::create_dir(&status_dir).expect("Failed to create status directory");
        fs::write(&mount_table, table).expect("Failed to write mount table");

        let mut config = SupervisorConfig {
            mount_table: mount_table.clone(),
            status_dir,
            publish_interval_secs: 1,
            ..SupervisorConfig::default()
        };
        adjust(&mut config);

        let registry = Arc::new(MigrationTable::new("integration", config.max_migrations));
        let remounter = Arc::new(FakeRemounter::new(&mount_table));
        let supervisor = Arc::new(Supervisor::new(
            config,
            registry.clone(),
            remounter.clone(),
        ));

        Self {
            temp,
            mount_table,
            registry,
            remounter,
            supervisor,
        }
    }

    pub fn write_table(&self, table: &str) {
        fs::write(&self.mount_table, table).expect("Failed to write mount table");
    }

    pub fn status_dir(&self) -> &Path {
        &self.supervisor.config().status_dir
    }

    pub fn tracked(&self) -> Vec<String> {
        self.registry.datasets()
    }
}

/// Listener behaviour for [`RecordingTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeListener {
    pub stats: QueueStats,
    pub fail_sends: bool,
}

/// In-memory listener transport recording everything delivered.
#[derive(Default)]
pub struct RecordingTransport {
    listeners: Mutex<HashMap<PathBuf, FakeListener>>,
    sent: Arc<Mutex<Vec<(PathBuf, StatusMessage)>>>,
    destroyed: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingTransport {
    /// Create the listener file and remember how its channel behaves.
    pub fn add_listener(&self, path: &Path, listener: FakeListener) {
        fs::write(path, "").expect("Failed to create listener file");
        self.listeners
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), listener);
    }

    pub fn sent_to(&self, path: &Path) -> Vec<StatusMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn destroyed(&self) -> Vec<PathBuf> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl ListenerTransport for RecordingTransport {
    fn open(&self, path: &Path) -> ChannelResult<Box<dyn ListenerChannel>> {
        let listener = self
            .listeners
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| ChannelError::Lookup {
                path: path.to_path_buf(),
                errno: nix::errno::Errno::ENOENT,
            })?;
        Ok(Box::new(RecordingChannel {
            path: path.to_path_buf(),
            listener,
            sent: Arc::clone(&self.sent),
            destroyed: Arc::clone(&self.destroyed),
        }))
    }
}

struct RecordingChannel {
    path: PathBuf,
    listener: FakeListener,
    sent: Arc<Mutex<Vec<(PathBuf, StatusMessage)>>>,
    destroyed: Arc<Mutex<Vec<PathBuf>>>,
}

impl ListenerChannel for RecordingChannel {
    fn path(&self) -> &Path {
        &self.path
    }

    fn stats(&self) -> ChannelResult<QueueStats> {
        Ok(self.listener.stats)
    }

    fn send(&mut self, message: &StatusMessage) -> ChannelResult<()> {
        if self.listener.fail_sends {
            return Err(ChannelError::Send {
                path: self.path.clone(),
                errno: nix::errno::Errno::EAGAIN,
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((self.path.clone(), message.clone()));
        Ok(())
    }

    fn destroy(self: Box<Self>) -> ChannelResult<()> {
        self.destroyed.lock().unwrap().push(self.path.clone());
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}
