//! Async work units with monotonic status progression.
//!
//! Longer-running side tasks (snapshot refreshes, enrichment, simulation)
//! are tracked as [`Job`] rows. A job moves from `created` toward exactly
//! one terminal status and is never reused across runs.

use crate::segment::{SegmentId, SegmentVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised on an illegal job status transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal job transition: {from} -> {to}")]
pub struct JobTransitionError {
    /// Status the job is currently in.
    pub from: JobStatus,
    /// Status the caller attempted to move to.
    pub to: JobStatus,
}

/// Lifecycle status of a job.
///
/// Allowed transitions: `Created → Running`, `Created/Running → Completed |
/// Failed | NotImplemented`. Terminal statuses never transition again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Recorded but not yet picked up.
    Created,
    /// Currently executing.
    Running,
    /// Finished successfully; `result` holds the outcome.
    Completed,
    /// Finished with an error; `result` holds the error context.
    Failed,
    /// The requested job type has no executor in this deployment.
    NotImplemented,
}

impl JobStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotImplemented => "not_implemented",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "not_implemented" => Some(Self::NotImplemented),
            _ => None,
        }
    }

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotImplemented)
    }

    /// Whether a transition to `next` is allowed (strictly monotonic).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Created => matches!(
                next,
                Self::Running | Self::Completed | Self::Failed | Self::NotImplemented
            ),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::NotImplemented => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One async unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (UUID v4).
    pub id: String,
    /// Job type slug, e.g. `snapshot_refresh`.
    pub job_type: String,
    /// Current status.
    pub status: JobStatus,
    /// Segment the job concerns, when applicable.
    pub segment_id: Option<SegmentId>,
    /// Snapshot version the job concerns, when applicable.
    pub segment_version: Option<SegmentVersion>,
    /// Input parameters recorded at creation.
    pub payload: serde_json::Value,
    /// Outcome recorded at the terminal transition.
    pub result: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job in `Created` status.
    #[must_use]
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            status: JobStatus::Created,
            segment_id: None,
            segment_version: None,
            payload,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the segment scope this job operates on.
    #[must_use]
    pub fn for_segment(mut self, segment_id: SegmentId, version: SegmentVersion) -> Self {
        self.segment_id = Some(segment_id);
        self.segment_version = Some(version);
        self
    }

    /// Transition to a new status, enforcing monotonicity.
    ///
    /// # Errors
    ///
    /// Returns [`JobTransitionError`] when the transition would move
    /// backwards or leave a terminal status.
    pub fn transition(
        &mut self,
        status: JobStatus,
        result: Option<serde_json::Value>,
    ) -> Result<(), JobTransitionError> {
        if !self.status.can_transition_to(status) {
            return Err(JobTransitionError {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
