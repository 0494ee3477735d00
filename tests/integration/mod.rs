//! Integration tests for the shadow migration supervisor
//!
//! These tests drive the public API end to end: assessment passes against a
//! mount table on disk, the remount retry lifecycle, listener fan-out and
//! the full daemon lifecycle.

pub mod daemon;
pub mod helpers;
pub mod listeners;
pub mod scenarios;
