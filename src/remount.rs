//! Standby → active remount primitive.

use std::io::Read;
use std::process::{ChildStderr, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Result of one remount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemountOutcome {
    Remounted,
    /// Remote source unreachable or remount otherwise refused; retryable
    Failed,
    /// The dataset is gone; never retry
    NoSuchDataset,
}

/// Promotes a standby shadow mount to active.
pub trait Remounter: Send + Sync {
    fn remount(&self, dataset: &str) -> RemountOutcome;
}

/// How long to wait for stderr to reach EOF once the command has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs an external command with the dataset name appended.
#[derive(Debug, Clone)]
pub struct CommandRemounter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRemounter {
    /// Build from a command line (`program arg...`). Returns `None` if empty.
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn run(&self, dataset: &str) -> std::io::Result<Option<(i32, String)>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(dataset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drained concurrently, or a chatty command blocks on a full pipe
        // and is reported as timed out.
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout) {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        match status {
            Some(status) => {
                let stderr = stderr
                    .recv_timeout(STDERR_DRAIN_TIMEOUT)
                    .unwrap_or_default();
                Ok(Some((status.code().unwrap_or(-1), stderr)))
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Ok(None)
            }
        }
    }
}

fn drain(pipe: Option<ChildStderr>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

impl Remounter for CommandRemounter {
    fn remount(&self, dataset: &str) -> RemountOutcome {
        match self.run(dataset) {
            Ok(Some((0, _))) => {
                debug!(dataset, "Remounted active");
                RemountOutcome::Remounted
            }
            Ok(Some((code, stderr))) => {
                let stderr = stderr.trim();
                if stderr.contains("does not exist") {
                    RemountOutcome::NoSuchDataset
                } else {
                    debug!(dataset, code, stderr, "Remount refused");
                    RemountOutcome::Failed
                }
            }
            Ok(None) => {
                warn!(dataset, timeout_secs = self.timeout.as_secs(), "Remount timed out");
                RemountOutcome::Failed
            }
            Err(e) => {
                warn!(dataset, program = %self.program, "Failed to run remount command: {e}");
                RemountOutcome::Failed
            }
        }
    }
}
