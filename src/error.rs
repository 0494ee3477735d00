//! Error types for shadowd
//!
//! Errors are grouped by the collaborator that raised them so callers can
//! decide what is contained (one mount record, one listener) and what must
//! escalate to a daemon-wide shutdown.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the Migration Registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has been told to stop all work
    #[error("Migration registry '{service}' is stopped")]
    Stopped { service: String },

    /// Bookkeeping could not grow; correctness can no longer be guaranteed
    #[error("Migration registry exhausted: cannot track more than {limit} datasets")]
    Exhausted { limit: usize },
}

impl RegistryError {
    /// Exhaustion is the only registry failure that escalates to shutdown.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, RegistryError::Exhausted { .. })
    }
}

/// Supervisor-internal failures.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The remount retry queue could not allocate a new request
    #[error("Cannot queue remount of '{dataset}': out of memory")]
    Exhausted { dataset: String },

    /// Registry failure that escalated past a single record
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Event Watcher failures. All of them are terminal for the watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The mount table could not be stat'ed
    #[error("Cannot stat mount table '{path}': {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interest in the mount table could not be registered
    #[error("Cannot watch mount table '{path}': {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// Retrieving the next change notification failed
    #[error("Failed to retrieve mount table event: {0}")]
    Retrieve(#[source] nix::Error),

    /// Re-reading the table to re-arm the notification failed
    #[error("Cannot re-arm watch on '{path}': {source}")]
    Rearm {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The interrupt pipe could not be created or read
    #[error("Watcher interrupt pipe failed: {0}")]
    Interrupt(#[source] std::io::Error),
}

/// Listener message-queue failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No queue exists for the listener file (listener never created one, or is gone)
    #[error("No message queue for listener '{path}': {errno}")]
    Lookup { path: PathBuf, errno: nix::Error },

    /// Queue statistics could not be read
    #[error("Cannot stat message queue for '{path}': {errno}")]
    Stat { path: PathBuf, errno: nix::Error },

    /// A non-blocking send failed
    #[error("Send to listener '{path}' failed: {errno}")]
    Send { path: PathBuf, errno: nix::Error },

    /// A payload larger than one message can carry
    #[error("Message for '{path}' is {len} bytes, limit is {limit}")]
    Oversized {
        path: PathBuf,
        len: usize,
        limit: usize,
    },

    /// A blocking receive failed
    #[error("Receive on '{path}' failed: {errno}")]
    Receive { path: PathBuf, errno: nix::Error },

    /// The queue could not be removed
    #[error("Cannot remove message queue for '{path}': {errno}")]
    Destroy { path: PathBuf, errno: nix::Error },

    /// The listener file or queue could not be created
    #[error("Cannot register listener at '{path}': {reason}")]
    Create { path: PathBuf, reason: String },

    /// A received payload was not valid status text
    #[error("Malformed status line '{line}'")]
    Malformed { line: String },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A field value is out of range
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias for RegistryError
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Result type alias for ChannelError
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
