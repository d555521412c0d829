//! Workflow aggregate: status, job map, failure log, and singleton policy.
//!
//! A `WorkflowRecord` is persisted as one blob per workflow. The job map is only
//! mutated by the manager while it holds the workflow's exclusive lock; this
//! crate provides the pure data operations and leaves the locking to
//! `jobgraph-core`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowStateError;
use crate::job::{JobFailure, JobRecord, Payload};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
///
/// ```text
/// initial -> running -> succeeded
///               |  ^ -> failed
///               v  |
///            suspended -> failed
///
/// any non-finished status -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initial,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Suspended,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Initial => "initial",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Suspended => "suspended",
        }
    }

    /// Terminal statuses: succeeded, failed, cancelled.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Statuses that count against the singleton policy.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Running | WorkflowStatus::Suspended)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(WorkflowStatus::Initial),
            "running" => Ok(WorkflowStatus::Running),
            "succeeded" => Ok(WorkflowStatus::Succeeded),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            "suspended" => Ok(WorkflowStatus::Suspended),
            other => Err(format!("unknown workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure log
// ---------------------------------------------------------------------------

/// One entry of a workflow's append-only failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failed job, or `None` for orchestration-level errors.
    pub job_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
}

impl FailureRecord {
    /// Log entry for a failed job.
    pub fn for_job(job: &JobRecord) -> Self {
        let message = job
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            job_id: Some(job.id.clone()),
            message,
            failure: job.failure.clone(),
            created_at: Utc::now(),
        }
    }

    /// Log entry for an error not attributable to a job's own logic.
    pub fn orchestration(job_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.map(str::to_string),
            message: message.into(),
            failure: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRecord
// ---------------------------------------------------------------------------

/// The workflow aggregate and unit of concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    /// Type discriminator naming the registered workflow definition.
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: WorkflowStatus,
    /// Job id -> serialized job.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobRecord>,
    /// Append-only failure log.
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    /// At most one running/suspended instance per (type, identifier).
    #[serde(default)]
    pub singleton: bool,
    /// Logical identifier scoping the singleton policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a workflow in status `initial` with a fresh UUIDv7.
    pub fn new(workflow_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Initial,
            jobs: BTreeMap::new(),
            failures: Vec::new(),
            singleton: false,
            identifier: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the singleton policy.
    pub fn with_singleton(mut self, singleton: bool, identifier: Option<String>) -> Self {
        self.singleton = singleton;
        self.identifier = identifier;
        self
    }

    /// Replace the job map, pointing every job at this workflow.
    pub fn with_jobs(mut self, jobs: BTreeMap<String, JobRecord>) -> Self {
        self.set_jobs(jobs);
        self
    }

    pub fn set_jobs(&mut self, mut jobs: BTreeMap<String, JobRecord>) {
        for job in jobs.values_mut() {
            job.workflow_id = self.id;
        }
        self.jobs = jobs;
    }

    // -----------------------------------------------------------------------
    // Job map access
    // -----------------------------------------------------------------------

    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut JobRecord> {
        self.jobs.get_mut(id)
    }

    /// Insert or replace a job by id.
    pub fn set_job(&mut self, job: JobRecord) {
        self.jobs.insert(job.id.clone(), job);
    }

    /// Jobs without inbound edges.
    pub fn initial_jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values().filter(|j| j.is_initial())
    }

    /// Whether the job exists, is idle, and every parent succeeded.
    pub fn is_job_ready_to_start(&self, id: &str) -> bool {
        self.job(id).is_some_and(|job| {
            job.is_ready_to_start(|parent| self.job(parent).is_some_and(JobRecord::is_succeeded))
        })
    }

    /// Outputs of the job's parents, in edge order.
    pub fn incoming_payloads(&self, id: &str) -> Vec<Payload> {
        let Some(job) = self.job(id) else {
            return Vec::new();
        };
        job.incoming
            .iter()
            .filter_map(|parent_id| self.job(parent_id))
            .map(|parent| Payload {
                id: parent.id.clone(),
                job_type: parent.job_type.clone(),
                value: parent.output.clone(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Aggregate queries
    // -----------------------------------------------------------------------

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Work still pending: a job in flight, or a root that was never enqueued.
    pub fn has_scheduled_jobs(&self) -> bool {
        self.jobs
            .values()
            .any(|j| j.is_scheduled() || (j.is_initial() && !j.is_enqueued()))
    }

    pub fn has_suspended_jobs(&self) -> bool {
        self.jobs.values().any(JobRecord::is_suspended)
    }

    /// Final classification once nothing is schedulable.
    pub fn completion_status(&self) -> WorkflowStatus {
        if self.has_failures() {
            WorkflowStatus::Failed
        } else if self.has_suspended_jobs() {
            WorkflowStatus::Suspended
        } else {
            WorkflowStatus::Succeeded
        }
    }

    pub fn add_failure(&mut self, record: FailureRecord) {
        self.failures.push(record);
        self.updated_at = Utc::now();
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// initial | suspended -> running
    pub fn mark_running(&mut self) -> Result<(), WorkflowStateError> {
        self.transition(
            WorkflowStatus::Running,
            &[WorkflowStatus::Initial, WorkflowStatus::Suspended],
        )
    }

    /// suspended -> running
    pub fn mark_resumed(&mut self) -> Result<(), WorkflowStateError> {
        self.transition(WorkflowStatus::Running, &[WorkflowStatus::Suspended])
    }

    /// running | suspended -> failed
    pub fn mark_failed(&mut self) -> Result<(), WorkflowStateError> {
        self.transition(
            WorkflowStatus::Failed,
            &[WorkflowStatus::Running, WorkflowStatus::Suspended],
        )
    }

    /// running -> succeeded
    pub fn mark_succeeded(&mut self) -> Result<(), WorkflowStateError> {
        self.transition(WorkflowStatus::Succeeded, &[WorkflowStatus::Running])
    }

    /// running -> suspended
    pub fn mark_suspended(&mut self) -> Result<(), WorkflowStateError> {
        self.transition(WorkflowStatus::Suspended, &[WorkflowStatus::Running])
    }

    /// any non-finished status -> cancelled
    pub fn mark_cancelled(&mut self) -> Result<(), WorkflowStateError> {
        if self.status.is_finished() {
            return Err(self.illegal(WorkflowStatus::Cancelled));
        }
        self.status = WorkflowStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn transition(
        &mut self,
        to: WorkflowStatus,
        allowed_from: &[WorkflowStatus],
    ) -> Result<(), WorkflowStateError> {
        if !allowed_from.contains(&self.status) {
            return Err(self.illegal(to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn illegal(&self, to: WorkflowStatus) -> WorkflowStateError {
        WorkflowStateError {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
