//! Configuration types for shadowd
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The TOML-loadable supervisor configuration with defaults
//! - Validation of configured values

use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest status message payload; must hold any single status line.
pub const MIN_MESSAGE_SIZE: usize = 512;

/// Largest status message payload the default SysV `msgmax` accepts.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Shadow migration supervisor
#[derive(Parser, Debug)]
#[command(name = "shadowd", version, about = "Shadow migration supervisor daemon")]
pub struct CliArgs {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the supervisor in the foreground until terminated
    Run(RunArgs),

    /// Listen for migration statistics published by a running supervisor
    Stat(StatArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mount table to watch
    #[arg(long, value_name = "PATH")]
    pub mount_table: Option<PathBuf>,

    /// Directory where listeners register
    #[arg(long, value_name = "DIR")]
    pub status_dir: Option<PathBuf>,

    /// Seconds between statistics publications
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Lock file guaranteeing a single running instance
    #[arg(long, value_name = "FILE")]
    pub pid_file: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct StatArgs {
    /// Supervisor TOML configuration file to take the listener settings from
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory where listeners register
    #[arg(long, value_name = "DIR")]
    pub status_dir: Option<PathBuf>,

    /// Listener file name prefix
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// `ftok` project id of the supervisor's listener queues (decimal or 0x hex)
    #[arg(long, value_name = "ID", value_parser = parse_project_id)]
    pub project_id: Option<i32>,

    /// Stop after this many batches
    #[arg(short = 'n', long, value_name = "NUM")]
    pub count: Option<usize>,

    /// Print each batch as JSON
    #[arg(long)]
    pub json: bool,
}

const DEFAULT_STATUS_DIR: &str = "/run/shadowd";
const DEFAULT_LISTENER_PREFIX: &str = "shadowstat.";

fn parse_project_id(value: &str) -> Result<i32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("'{value}' is not a project id: {e}"))
}

/// Remount primitive settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemountConfig {
    /// Command line run with the dataset name appended
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RemountConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "zfs".to_string(),
                "mount".to_string(),
                "-o".to_string(),
                "remount,shadow=active".to_string(),
            ],
            timeout_secs: 60,
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Identity handed to the Migration Registry
    pub service_id: String,
    pub mount_table: PathBuf,
    pub status_dir: PathBuf,
    pub listener_prefix: String,
    pub publish_interval_secs: u64,
    /// Payload capacity of one status message
    pub message_size: usize,
    /// Queue depth above which a lagging listener is considered dead
    pub dead_listener_depth: u64,
    /// `ftok` project id for listener queues
    pub ipc_project_id: i32,
    /// Registry capacity
    pub max_migrations: usize,
    pub pid_file: Option<PathBuf>,
    pub remount: RemountConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            service_id: "shadowd".to_string(),
            mount_table: PathBuf::from("/proc/self/mounts"),
            status_dir: PathBuf::from(DEFAULT_STATUS_DIR),
            listener_prefix: DEFAULT_LISTENER_PREFIX.to_string(),
            publish_interval_secs: 10,
            message_size: 2048,
            dead_listener_depth: 16,
            ipc_project_id: 0x53,
            max_migrations: 4096,
            pid_file: None,
            remount: RemountConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build from `run` arguments: config file first, then flag overrides.
    pub fn from_args(args: &RunArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(path) = &args.mount_table {
            config.mount_table = path.clone();
        }
        if let Some(dir) = &args.status_dir {
            config.status_dir = dir.clone();
        }
        if let Some(secs) = args.interval {
            config.publish_interval_secs = secs;
        }
        if let Some(path) = &args.pid_file {
            config.pid_file = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the listener side's view from `stat` arguments, so `stat`
    /// finds the queues of a supervisor started with the same file.
    pub fn from_stat_args(args: &StatArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(dir) = &args.status_dir {
            config.status_dir = dir.clone();
        }
        if let Some(prefix) = &args.prefix {
            config.listener_prefix = prefix.clone();
        }
        if let Some(id) = args.project_id {
            config.ipc_project_id = id;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "publish_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE).contains(&self.message_size) {
            return Err(ConfigError::Invalid {
                field: "message_size",
                reason: format!(
                    "{} is outside {MIN_MESSAGE_SIZE}..={MAX_MESSAGE_SIZE}",
                    self.message_size
                ),
            });
        }
        if self.listener_prefix.is_empty() || self.listener_prefix.contains('/') {
            return Err(ConfigError::Invalid {
                field: "listener_prefix",
                reason: format!("'{}' is not a file name prefix", self.listener_prefix),
            });
        }
        // ftok uses only the low eight bits, and zero is unspecified.
        if self.ipc_project_id & 0xff == 0 {
            return Err(ConfigError::Invalid {
                field: "ipc_project_id",
                reason: format!("{:#x} has no low byte", self.ipc_project_id),
            });
        }
        if self.max_migrations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_migrations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.remount.command.is_empty() {
            return Err(ConfigError::Invalid {
                field: "remount.command",
                reason: "must name a program".to_string(),
            });
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn remount_timeout(&self) -> Duration {
        Duration::from_secs(self.remount.timeout_secs)
    }
}
