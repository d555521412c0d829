use thiserror::Error;

/// Errors from repository operations (used by the store traits in jobgraph-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Out-of-order job lifecycle transitions.
///
/// These are orchestration bugs, never user errors: the caller asked a job to
/// move to a state its timestamps do not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStateError {
    #[error("can't enqueue job '{0}': already enqueued")]
    AlreadyEnqueued(String),

    #[error("can't start job '{0}': already started")]
    AlreadyStarted(String),

    #[error("can't start job '{0}': not enqueued")]
    NotEnqueued(String),

    #[error("can't finish job '{0}': already finished")]
    AlreadyFinished(String),

    #[error("can't {action} job '{job_id}': not started")]
    NotStarted { job_id: String, action: &'static str },

    #[error("can't suspend job '{0}': already suspended")]
    AlreadySuspended(String),

    #[error("can't suspend job '{0}': not running")]
    NotRunning(String),

    #[error("can't resume job '{0}': already resumed")]
    AlreadyResumed(String),

    #[error("can't resume job '{0}': not suspended")]
    NotSuspended(String),
}

/// Illegal workflow status transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal workflow transition from '{from}' to '{to}'")]
pub struct WorkflowStateError {
    pub from: String,
    pub to: String,
}
