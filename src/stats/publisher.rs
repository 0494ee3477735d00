//! Stat Publisher: periodic registry snapshot fanned out to every listener.

use super::channel::{ListenerChannel, ListenerTransport};
use super::wire::{build_batch, StatusMessage};
use crate::supervisor::Supervisor;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Listeners that received the whole batch
    pub delivered: usize,
    /// Listeners destroyed as dead during this cycle
    pub evicted: usize,
    /// Messages in the cycle's batch
    pub messages: usize,
    /// The registry snapshot failed and nothing was sent
    pub skipped: bool,
}

pub struct StatPublisher {
    supervisor: Arc<Supervisor>,
    transport: Arc<dyn ListenerTransport>,
}

impl StatPublisher {
    pub fn new(supervisor: Arc<Supervisor>, transport: Arc<dyn ListenerTransport>) -> Self {
        Self {
            supervisor,
            transport,
        }
    }

    /// Run one cycle under the supervisor lock. Returns `None` once exit has
    /// been requested.
    pub fn publish_once(&self) -> Option<PublishReport> {
        let state = self.supervisor.lock();
        if state.is_exiting() {
            return None;
        }

        let config = self.supervisor.config();
        let rows = match self.supervisor.registry().status_all() {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to snapshot migration status, skipping cycle: {e}");
                return Some(PublishReport {
                    skipped: true,
                    ..PublishReport::default()
                });
            }
        };

        let batch = build_batch(&rows, config.message_size);
        let mut report = PublishReport {
            messages: batch.len(),
            ..PublishReport::default()
        };

        for path in discover_listeners(&config.status_dir, &config.listener_prefix) {
            let channel = match self.transport.open(&path) {
                Ok(channel) => channel,
                Err(e) => {
                    debug!("Skipping listener: {e}");
                    continue;
                }
            };

            match channel.stats() {
                Ok(stats)
                    if stats.is_dead(config.dead_listener_depth, config.publish_interval()) =>
                {
                    info!(
                        listener = %path.display(),
                        depth = stats.depth,
                        "Listener stopped draining its queue, evicting"
                    );
                    evict(channel);
                    report.evicted += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Skipping listener: {e}");
                    continue;
                }
            }

            match deliver(channel, &batch) {
                Ok(()) => report.delivered += 1,
                Err(channel) => {
                    evict(channel);
                    report.evicted += 1;
                }
            }
        }

        drop(state);
        debug!(
            rows = rows.len(),
            messages = report.messages,
            delivered = report.delivered,
            evicted = report.evicted,
            "Published migration status"
        );
        Some(report)
    }

    /// Publish, sleep one interval, repeat until exit.
    pub fn run(&self) {
        let interval = self.supervisor.config().publish_interval();
        while self.publish_once().is_some() {
            thread::sleep(interval);
            if self.supervisor.exit_requested() {
                break;
            }
        }
        info!("Stat publisher stopped");
    }
}

/// Send every message in order. A failed send hands the channel back for
/// eviction; the rest of the batch is abandoned for this listener.
fn deliver(
    mut channel: Box<dyn ListenerChannel>,
    batch: &[StatusMessage],
) -> Result<(), Box<dyn ListenerChannel>> {
    for message in batch {
        if let Err(e) = channel.send(message) {
            warn!("Listener send failed, evicting: {e}");
            return Err(channel);
        }
    }
    Ok(())
}

fn evict(channel: Box<dyn ListenerChannel>) {
    let path = channel.path().to_path_buf();
    if let Err(e) = channel.destroy() {
        warn!(listener = %path.display(), "Failed to remove listener queue: {e}");
    }
}

/// Listener files in `dir` whose names start with `prefix`, sorted.
///
/// An unreadable directory yields no listeners.
pub fn discover_listeners(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "Cannot read status directory: {e}");
            return Vec::new();
        }
    };

    let mut listeners: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    listeners.sort();
    listeners
}

/// Spawn the Stat Publisher thread.
pub fn spawn_publisher(
    supervisor: Arc<Supervisor>,
    transport: Arc<dyn ListenerTransport>,
) -> io::Result<JoinHandle<()>> {
    let publisher = StatPublisher::new(supervisor, transport);
    thread::Builder::new()
        .name("stat-publisher".to_string())
        .spawn(move || publisher.run())
}
