use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a job's status record: `pending -> running -> success | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Non-terminal states may be rewritten with the same status to update
    /// the message. A job that fails before it starts running (missing host,
    /// bad secret) goes straight from pending to error.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Pending) => true,
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Error) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Success) => true,
            (JobStatus::Running, JobStatus::Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// What a job deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTarget {
    /// One host record. `variant` selects a named script (e.g. "dev")
    /// instead of the host's default script.
    Host {
        host_id: i64,
        variant: Option<String>,
    },
    /// Every active host of an owner's pipeline.
    Pipeline { pipeline_id: i64, owner_id: i64 },
}

impl std::fmt::Display for JobTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobTarget::Host {
                host_id,
                variant: Some(variant),
            } => write!(f, "host {} ({})", host_id, variant),
            JobTarget::Host { host_id, .. } => write!(f, "host {}", host_id),
            JobTarget::Pipeline { pipeline_id, .. } => write!(f, "pipeline {}", pipeline_id),
        }
    }
}

/// A deployment request. `id` is the status record that tracks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub target: JobTarget,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: i64, target: JobTarget) -> Self {
        Self {
            id,
            target,
            enqueued_at: Utc::now(),
        }
    }

    pub fn host(id: i64, host_id: i64) -> Self {
        Self::new(
            id,
            JobTarget::Host {
                host_id,
                variant: None,
            },
        )
    }

    pub fn pipeline(id: i64, pipeline_id: i64, owner_id: i64) -> Self {
        Self::new(
            id,
            JobTarget::Pipeline {
                pipeline_id,
                owner_id,
            },
        )
    }
}
