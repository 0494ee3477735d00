//! Event Watcher: turns mount-table change notifications into reassessment
//! requests.
//!
//! Interest in the table is one-shot and renewed after every delivered
//! event. Regular files are watched with an `IN_ONESHOT` inotify watch;
//! procfs mount tables signal `POLLPRI` on an open descriptor and are
//! re-armed by reading them again. Either way the blocking wait also polls a
//! self-pipe so shutdown can interrupt it.

use super::state::Supervisor;
use crate::error::WatchError;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use tracing::{debug, error, info};

/// What the watcher observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The mount table may have changed
    Modified,
    /// The wait was interrupted for shutdown
    Interrupted,
}

/// Wakes a blocked [`ChangeSource::next_change`].
#[derive(Clone)]
pub struct WatchInterrupt(Arc<dyn Fn() + Send + Sync>);

impl WatchInterrupt {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(wake))
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for WatchInterrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchInterrupt")
    }
}

/// Source of mount-table change notifications.
pub trait ChangeSource: Send {
    /// Block until the table changes or the wait is interrupted.
    fn next_change(&mut self) -> Result<Change, WatchError>;

    /// Handle that interrupts a pending or future `next_change`.
    fn interrupter(&self) -> WatchInterrupt;
}

enum WatchMode {
    Inotify(Inotify),
    Procfs(File),
}

/// Watches the mount table file.
pub struct MountTableWatcher {
    path: PathBuf,
    mode: WatchMode,
    wake_rx: File,
    wake_tx: Arc<File>,
    registered_mtime: Option<SystemTime>,
    pending: bool,
}

const WATCH_FLAGS: AddWatchFlags = AddWatchFlags::IN_MODIFY
    .union(AddWatchFlags::IN_CLOSE_WRITE)
    .union(AddWatchFlags::IN_ATTRIB)
    .union(AddWatchFlags::IN_MOVE_SELF)
    .union(AddWatchFlags::IN_DELETE_SELF)
    .union(AddWatchFlags::IN_ONESHOT);

impl MountTableWatcher {
    /// Register interest in `path`.
    pub fn new(path: &Path) -> Result<Self, WatchError> {
        let mtime = modified(path)?;

        let (rx, tx) = nix::unistd::pipe().map_err(|e| WatchError::Interrupt(e.into()))?;

        let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mode = if resolved.starts_with("/proc") {
            let file = File::open(path).map_err(|source| WatchError::Stat {
                path: path.to_path_buf(),
                source,
            })?;
            WatchMode::Procfs(file)
        } else {
            let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK).map_err(
                |source| WatchError::Register {
                    path: path.to_path_buf(),
                    source,
                },
            )?;
            WatchMode::Inotify(inotify)
        };

        let mut watcher = Self {
            path: path.to_path_buf(),
            mode,
            wake_rx: File::from(rx),
            wake_tx: Arc::new(File::from(tx)),
            registered_mtime: mtime,
            pending: false,
        };
        watcher.register()?;
        debug!(path = %watcher.path.display(), procfs = watcher.is_procfs(), "Watching mount table");
        Ok(watcher)
    }

    fn is_procfs(&self) -> bool {
        matches!(self.mode, WatchMode::Procfs(_))
    }

    /// (Re-)register one-shot interest in the table.
    fn register(&mut self) -> Result<(), WatchError> {
        match &mut self.mode {
            WatchMode::Inotify(inotify) => {
                inotify
                    .add_watch(&self.path, WATCH_FLAGS)
                    .map_err(|source| WatchError::Register {
                        path: self.path.clone(),
                        source,
                    })?;
            }
            WatchMode::Procfs(file) => {
                let rearm = |file: &mut File| -> io::Result<()> {
                    file.seek(SeekFrom::Start(0))?;
                    io::copy(file, &mut io::sink())?;
                    Ok(())
                };
                rearm(file).map_err(|source| WatchError::Rearm {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Consume a delivered event and renew interest using the freshly
    /// observed modification time.
    fn renew(&mut self) -> Result<(), WatchError> {
        if let WatchMode::Inotify(inotify) = &self.mode {
            match inotify.read_events() {
                Ok(_) | Err(Errno::EAGAIN) => {}
                Err(e) => return Err(WatchError::Retrieve(e)),
            }
        }

        let observed = modified(&self.path)?;
        debug!(
            path = %self.path.display(),
            mtime_moved = observed != self.registered_mtime,
            "Renewing mount table watch"
        );
        self.register()?;
        let after = modified(&self.path)?;
        self.settle(observed, after);
        Ok(())
    }

    /// A change that landed between the event and the new registration
    /// would otherwise be lost; report it on the next call instead.
    fn settle(&mut self, observed: Option<SystemTime>, after: Option<SystemTime>) {
        if after != observed {
            self.pending = true;
        }
        self.registered_mtime = after;
    }

    fn watch_fd(&self) -> (BorrowedFd<'_>, PollFlags) {
        match &self.mode {
            WatchMode::Inotify(inotify) => (inotify.as_fd(), PollFlags::POLLIN),
            WatchMode::Procfs(file) => (file.as_fd(), PollFlags::POLLPRI),
        }
    }
}

impl ChangeSource for MountTableWatcher {
    fn next_change(&mut self) -> Result<Change, WatchError> {
        if self.pending {
            self.pending = false;
            return Ok(Change::Modified);
        }

        loop {
            let (changed, interrupted) = {
                let (fd, events) = self.watch_fd();
                let mut fds = [
                    PollFd::new(fd, events),
                    PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(WatchError::Retrieve(e)),
                }
                let ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
                (ready(&fds[0]), ready(&fds[1]))
            };

            if interrupted {
                let mut buf = [0u8; 64];
                (&self.wake_rx)
                    .read(&mut buf)
                    .map_err(WatchError::Interrupt)?;
                return Ok(Change::Interrupted);
            }
            if changed {
                self.renew()?;
                return Ok(Change::Modified);
            }
        }
    }

    fn interrupter(&self) -> WatchInterrupt {
        let tx = Arc::clone(&self.wake_tx);
        WatchInterrupt::new(move || {
            let _ = (&*tx).write(&[1]);
        })
    }
}

fn modified(path: &Path) -> Result<Option<SystemTime>, WatchError> {
    let metadata = fs::metadata(path).map_err(|source| WatchError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(metadata.modified().ok())
}

/// Spawn the Event Watcher thread.
pub(super) fn spawn_watcher(
    supervisor: Arc<Supervisor>,
    source: Box<dyn ChangeSource>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mtab-watcher".to_string())
        .spawn(move || run_watcher(&supervisor, source))
}

/// WATCHING → event → request reassessment → WATCHING, until interrupted.
/// Any watch failure is terminal for the whole daemon.
pub(super) fn run_watcher(supervisor: &Supervisor, mut source: Box<dyn ChangeSource>) {
    loop {
        match source.next_change() {
            Ok(Change::Modified) => {
                debug!("Mount table changed");
                if !supervisor.notify_mount_change() {
                    break;
                }
            }
            Ok(Change::Interrupted) => {
                if supervisor.exit_requested() {
                    break;
                }
            }
            Err(e) => {
                error!("Mount table watcher failed: {e}");
                supervisor.request_exit();
                break;
            }
        }
    }
    info!("Mount table watcher stopped");
}
