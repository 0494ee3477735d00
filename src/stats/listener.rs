//! Listener side of the status protocol.

use super::channel::{queue_key, queue_remove, RawMessage};
use super::wire::{parse_batch, MessageKind};
use crate::config::MAX_MESSAGE_SIZE;
use crate::error::{ChannelError, ChannelResult};
use crate::registry::MigrationStat;
use nix::errno::Errno;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A registered listener: a file in the status directory plus the message
/// queue keyed on it. Both are removed on drop.
#[derive(Debug)]
pub struct StatusListener {
    path: PathBuf,
    id: i32,
}

impl StatusListener {
    /// Register as `<dir>/<prefix><pid>`.
    pub fn register(dir: &Path, prefix: &str, project_id: i32) -> ChannelResult<Self> {
        let path = dir.join(format!("{prefix}{}", std::process::id()));
        Self::register_at(path, project_id)
    }

    /// Register with an explicit listener file path.
    pub fn register_at(path: PathBuf, project_id: i32) -> ChannelResult<Self> {
        let create_err = |reason: String| ChannelError::Create {
            path: path.clone(),
            reason,
        };

        fs::write(&path, b"").map_err(|e| create_err(e.to_string()))?;

        let key = match queue_key(&path, project_id) {
            Ok(key) => key,
            Err(errno) => {
                let _ = fs::remove_file(&path);
                return Err(create_err(errno.to_string()));
            }
        };
        // SAFETY: msgget takes plain integers.
        let id = unsafe { libc::msgget(key, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            let errno = Errno::last();
            let _ = fs::remove_file(&path);
            return Err(create_err(errno.to_string()));
        }

        debug!(path = %path.display(), id, "Registered status listener");
        Ok(Self { path, id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle that removes the queue from another thread or a signal
    /// handler, failing a blocked [`receive_batch`](Self::receive_batch).
    pub fn interrupter(&self) -> ListenerInterrupt {
        ListenerInterrupt { id: self.id }
    }

    /// Block until a FINAL message completes a batch, then parse it.
    pub fn receive_batch(&mut self) -> ChannelResult<Vec<MigrationStat>> {
        let mut text = String::new();
        let mut raw = RawMessage::new(0);
        loop {
            // SAFETY: raw is a repr(C) msgbuf with MAX_MESSAGE_SIZE bytes of text.
            let len = unsafe {
                libc::msgrcv(
                    self.id,
                    &mut *raw as *mut RawMessage as *mut libc::c_void,
                    MAX_MESSAGE_SIZE,
                    0,
                    0,
                )
            };
            if len < 0 {
                let errno = Errno::last();
                if errno == Errno::EINTR {
                    continue;
                }
                return Err(ChannelError::Receive {
                    path: self.path.clone(),
                    errno,
                });
            }

            text.push_str(&String::from_utf8_lossy(&raw.mtext[..len as usize]));
            if MessageKind::from_mtype(raw.mtype as i64) == Some(MessageKind::Final) {
                return parse_batch(&text);
            }
        }
    }
}

/// Removes a listener's queue. Firing more than once is harmless.
#[derive(Debug, Clone, Copy)]
pub struct ListenerInterrupt {
    id: i32,
}

impl ListenerInterrupt {
    pub fn fire(&self) {
        let _ = queue_remove(self.id);
    }
}

impl Drop for StatusListener {
    fn drop(&mut self) {
        let _ = queue_remove(self.id);
        let _ = fs::remove_file(&self.path);
    }
}
