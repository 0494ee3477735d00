//! Remount retry queue.
//!
//! Standby mounts whose first promotion failed are retried once per
//! assessment pass, with no backoff beyond the cadence of mount-table
//! events, until they succeed, vanish, or reach the attempt ceiling.

use crate::error::SupervisorError;
use crate::remount::{RemountOutcome, Remounter};
use tracing::{debug, info, warn};

/// Attempt ceiling, counting the initial failed promotion.
pub const MAX_REMOUNT_TRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemountRequest {
    pub dataset: String,
    /// Attempts made so far, in 1..=MAX_REMOUNT_TRIES
    pub tries: u32,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    requests: Vec<RemountRequest>,
}

impl RetryQueue {
    /// Queue `dataset` after its first failed attempt.
    ///
    /// A dataset already queued keeps its existing request. Failing to
    /// allocate is reported as exhaustion: the queue can no longer be trusted.
    pub fn add(&mut self, dataset: &str) -> Result<(), SupervisorError> {
        if self.contains(dataset) {
            return Ok(());
        }
        self.requests
            .try_reserve(1)
            .map_err(|_| SupervisorError::Exhausted {
                dataset: dataset.to_string(),
            })?;
        self.requests.push(RemountRequest {
            dataset: dataset.to_string(),
            tries: 1,
        });
        debug!(dataset, "Queued remount request");
        Ok(())
    }

    /// Retry every queued remount once. Returns the datasets promoted.
    pub fn attempt_all(&mut self, remounter: &dyn Remounter) -> Vec<String> {
        let mut promoted = Vec::new();
        self.requests.retain_mut(|request| {
            let outcome = remounter.remount(&request.dataset);
            request.tries += 1;
            match outcome {
                RemountOutcome::Remounted => {
                    info!(dataset = %request.dataset, tries = request.tries, "Standby mount promoted to active");
                    promoted.push(request.dataset.clone());
                    false
                }
                RemountOutcome::NoSuchDataset => {
                    debug!(dataset = %request.dataset, "Dataset vanished, dropping remount request");
                    false
                }
                RemountOutcome::Failed if request.tries >= MAX_REMOUNT_TRIES => {
                    warn!(dataset = %request.dataset, tries = request.tries, "Giving up on remounting standby dataset");
                    false
                }
                RemountOutcome::Failed => true,
            }
        });
        promoted
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.requests.iter().any(|r| r.dataset == dataset)
    }

    pub fn requests(&self) -> &[RemountRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
