//! shadowd - shadow migration supervisor
//!
//! Watches the mount table for shadow-mounted datasets, keeps the Migration
//! Registry in step with it, retries standby mounts whose remote source is
//! unreachable, and publishes live progress to listener processes.

pub mod config;
pub mod error;
pub mod mount;
pub mod registry;
pub mod remount;
pub mod stats;
pub mod supervisor;
