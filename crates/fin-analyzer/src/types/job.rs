//! Job data model: broker messages, lifecycle states and result-backend records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::report::AnalysisReport;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Enqueued, not yet claimed by a worker
    Pending,
    /// Claimed by a worker and executing (re-entered on every retry)
    Started,
    /// Analysis finished with a result
    Success,
    /// Analysis failed permanently or exhausted its retry budget
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    /// SUCCESS and FAILURE are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// PENDING -> FAILURE only happens for a redelivered job whose budget
    /// was already spent before the worker died.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Started)
                | (JobState::Pending, JobState::Failure)
                | (JobState::Started, JobState::Started)
                | (JobState::Started, JobState::Success)
                | (JobState::Started, JobState::Failure)
        )
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "STARTED" => Ok(JobState::Started),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque key of a stored upload, owned by exactly one job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message carried by the broker from the submission API to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub query: String,
    pub document_ref: DocumentRef,
    /// Client-supplied file name, informational only
    pub filename: String,
    pub enqueued_at: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(job_id: Uuid, query: String, document_ref: DocumentRef, filename: String) -> Self {
        Self {
            job_id,
            query,
            document_ref,
            filename,
            enqueued_at: Utc::now(),
        }
    }
}

/// Human-readable progress annotation attached to a STARTED job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMeta {
    pub message: String,
    pub file: String,
}

impl ProgressMeta {
    pub fn new(message: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: file.into(),
        }
    }
}

/// A state change reported by the worker that owns the job
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// PENDING -> STARTED, or STARTED -> STARTED on a retry
    Started { attempt: u32, meta: ProgressMeta },
    /// STARTED -> SUCCESS
    Succeeded(AnalysisReport),
    /// STARTED -> FAILURE
    Failed { error: String },
}

impl StateUpdate {
    pub fn target_state(&self) -> JobState {
        match self {
            StateUpdate::Started { .. } => JobState::Started,
            StateUpdate::Succeeded(_) => JobState::Success,
            StateUpdate::Failed { .. } => JobState::Failure,
        }
    }
}

/// Result-backend entry for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub state: JobState,
    pub attempt_count: u32,
    pub result: Option<AnalysisReport>,
    pub error: Option<String>,
    pub meta: Option<ProgressMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Fresh PENDING record written at enqueue time
    pub fn pending(job_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            state: JobState::Pending,
            attempt_count: 0,
            result: None,
            error: None,
            meta: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a worker update, enforcing the forward-only state machine
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, update: StateUpdate) -> Result<()> {
        let next = update.target_state();
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job_id: self.job_id,
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        let file = self.meta.as_ref().map(|m| m.file.clone()).unwrap_or_default();
        match update {
            StateUpdate::Started { attempt, meta } => {
                self.attempt_count = attempt.max(self.attempt_count);
                self.meta = Some(meta);
            }
            StateUpdate::Succeeded(report) => {
                self.meta = Some(ProgressMeta::new("Analysis complete", file));
                self.result = Some(report);
                self.error = None;
                self.completed_at = Some(now);
            }
            StateUpdate::Failed { error } => {
                self.meta = Some(ProgressMeta::new("Analysis failed", file));
                self.error = Some(error);
                self.result = None;
                self.completed_at = Some(now);
            }
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
