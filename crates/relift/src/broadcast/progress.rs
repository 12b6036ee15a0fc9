//! Progress event broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::stage::{JobStatus, Stage, StageStatus};

/// Progress event for a job. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Pipeline stage this event refers to.
    pub stage: Stage,
    /// Status of that stage.
    pub stage_status: StageStatus,
    /// Overall job status at the time of the event.
    pub job_status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Rough overall completion, 0–100.
    pub percent: u8,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Event for a stage entering execution.
    pub fn stage_started(job_id: &str, stage: Stage, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            stage_status: StageStatus::InProgress,
            job_status: stage.active_job_status(),
            message: message.to_string(),
            percent: (stage.index() - 1) * 20 + 10,
            timestamp: Utc::now(),
        }
    }

    /// Event for a completed stage. The job is still running unless this
    /// was the final stage.
    pub fn stage_completed(job_id: &str, stage: Stage, message: &str) -> Self {
        let job_status = if stage == Stage::Deploy {
            JobStatus::Completed
        } else {
            stage.active_job_status()
        };
        Self {
            job_id: job_id.to_string(),
            stage,
            stage_status: StageStatus::Completed,
            job_status,
            message: message.to_string(),
            percent: stage.index() * 20,
            timestamp: Utc::now(),
        }
    }

    /// Event for the hard failure that terminates the pipeline.
    pub fn stage_failed(job_id: &str, stage: Stage, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            stage_status: StageStatus::Failed,
            job_status: JobStatus::Failed,
            message: error.to_string(),
            percent: (stage.index() - 1) * 20,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts progress events for streaming.
///
/// Sends with no active receiver are dropped; a lagged receiver skips
/// ahead. Durable observation goes through the job state store.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, event: ProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for all progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a subscriber that only yields events for one job.
    /// Dropping the subscription unsubscribes.
    pub fn subscribe_job(&self, job_id: &str) -> JobSubscription {
        JobSubscription {
            job_id: job_id.to_string(),
            rx: self.sender.subscribe(),
        }
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// A per-job filtered view over the event stream.
pub struct JobSubscription {
    job_id: String,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl JobSubscription {
    /// Receives the next event for this job. Returns `None` once the
    /// channel is closed. Lagged gaps are skipped silently; callers
    /// needing a complete history must poll the store.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.job_id == self.job_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
