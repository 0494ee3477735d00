//! Listener channels.
//!
//! A listener registers by creating a file in the status directory and a
//! System V message queue keyed on that file's path. The publisher looks
//! queues up (never creates them), checks they are being drained, and sends
//! status messages without blocking.

use super::wire::StatusMessage;
use crate::config::MAX_MESSAGE_SIZE;
use crate::error::{ChannelError, ChannelResult};
use nix::errno::Errno;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Queue statistics used for the liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Messages waiting in the queue
    pub depth: u64,
    /// Time of the last send, seconds since the epoch
    pub last_send: i64,
    /// Time of the last receive, seconds since the epoch
    pub last_recv: i64,
}

impl QueueStats {
    /// A listener is dead when its queue is backed up and it has not
    /// received anything for longer than one publish interval past the
    /// last send.
    pub fn is_dead(&self, depth_threshold: u64, interval: Duration) -> bool {
        let lag = self.last_send.saturating_sub(self.last_recv);
        self.depth > depth_threshold && lag > interval.as_secs() as i64
    }
}

/// Opens the channel of a listener discovered in the status directory.
pub trait ListenerTransport: Send + Sync {
    fn open(&self, path: &Path) -> ChannelResult<Box<dyn ListenerChannel>>;
}

/// One listener's queue, private to a single publish cycle.
pub trait ListenerChannel {
    /// Listener file the channel was derived from.
    fn path(&self) -> &Path;

    fn stats(&self) -> ChannelResult<QueueStats>;

    /// Non-blocking send.
    fn send(&mut self, message: &StatusMessage) -> ChannelResult<()>;

    /// Remove the queue so the listener observes its eviction.
    fn destroy(self: Box<Self>) -> ChannelResult<()>;
}

/// System V message-queue transport.
#[derive(Debug, Clone, Copy)]
pub struct SysvTransport {
    project_id: i32,
}

impl SysvTransport {
    pub fn new(project_id: i32) -> Self {
        Self { project_id }
    }
}

impl ListenerTransport for SysvTransport {
    fn open(&self, path: &Path) -> ChannelResult<Box<dyn ListenerChannel>> {
        let lookup = |errno| ChannelError::Lookup {
            path: path.to_path_buf(),
            errno,
        };
        let key = queue_key(path, self.project_id).map_err(lookup)?;
        // SAFETY: msgget takes plain integers.
        let id = unsafe { libc::msgget(key, 0) };
        if id < 0 {
            return Err(lookup(Errno::last()));
        }
        Ok(Box::new(SysvQueue {
            path: path.to_path_buf(),
            id,
        }))
    }
}

#[derive(Debug)]
struct SysvQueue {
    path: PathBuf,
    id: i32,
}

impl ListenerChannel for SysvQueue {
    fn path(&self) -> &Path {
        &self.path
    }

    fn stats(&self) -> ChannelResult<QueueStats> {
        let ds = queue_stat(self.id).map_err(|errno| ChannelError::Stat {
            path: self.path.clone(),
            errno,
        })?;
        Ok(QueueStats {
            depth: ds.msg_qnum as u64,
            last_send: ds.msg_stime as i64,
            last_recv: ds.msg_rtime as i64,
        })
    }

    fn send(&mut self, message: &StatusMessage) -> ChannelResult<()> {
        let payload = message.payload.as_bytes();
        let len = payload.len();
        if len > MAX_MESSAGE_SIZE {
            return Err(ChannelError::Oversized {
                path: self.path.clone(),
                len,
                limit: MAX_MESSAGE_SIZE,
            });
        }
        let mut raw = RawMessage::new(message.kind.as_mtype());
        raw.mtext[..len].copy_from_slice(payload);

        // SAFETY: raw is a repr(C) msgbuf whose text is at least len bytes.
        let rc = unsafe {
            libc::msgsnd(
                self.id,
                &*raw as *const RawMessage as *const libc::c_void,
                len,
                libc::IPC_NOWAIT,
            )
        };
        if rc < 0 {
            return Err(ChannelError::Send {
                path: self.path.clone(),
                errno: Errno::last(),
            });
        }
        Ok(())
    }

    fn destroy(self: Box<Self>) -> ChannelResult<()> {
        queue_remove(self.id).map_err(|errno| ChannelError::Destroy {
            path: self.path.clone(),
            errno,
        })
    }
}

/// `struct msgbuf` with a fixed-size text area.
#[repr(C)]
pub(super) struct RawMessage {
    pub(super) mtype: libc::c_long,
    pub(super) mtext: [u8; MAX_MESSAGE_SIZE],
}

impl RawMessage {
    pub(super) fn new(mtype: i64) -> Box<Self> {
        Box::new(Self {
            mtype: mtype as libc::c_long,
            mtext: [0; MAX_MESSAGE_SIZE],
        })
    }
}

/// Derive the queue key of a listener file.
pub(super) fn queue_key(path: &Path, project_id: i32) -> Result<libc::key_t, Errno> {
    let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;
    // SAFETY: cpath is a valid NUL-terminated string for the call's duration.
    let key = unsafe { libc::ftok(cpath.as_ptr(), project_id) };
    if key == -1 {
        return Err(Errno::last());
    }
    Ok(key)
}

pub(super) fn queue_stat(id: i32) -> Result<libc::msqid_ds, Errno> {
    // SAFETY: msqid_ds is plain old data; IPC_STAT fills it in.
    let mut ds: libc::msqid_ds = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::msgctl(id, libc::IPC_STAT, &mut ds) };
    if rc < 0 {
        return Err(Errno::last());
    }
    Ok(ds)
}

pub(super) fn queue_remove(id: i32) -> Result<(), Errno> {
    // SAFETY: IPC_RMID ignores the buffer argument.
    let rc = unsafe { libc::msgctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(Errno::last());
    }
    Ok(())
}
