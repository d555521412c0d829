//! Job domain types: the serialized DAG node and its lifecycle state machine.
//!
//! A job's state is never stored as an enum. It is derived from which lifecycle
//! timestamps are present, so the persisted JSON stays the single source of truth:
//!
//! ```text
//! initial -> enqueued -> started -> finished
//!                                -> failed
//!                                -> suspended -> resumed -> finished | failed
//!                                                        -> suspended (again)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobStateError;

/// Output sentinel meaning "paused, not finished".
pub const SUSPEND: &str = "suspend";

/// Returns true when `value` is the [`SUSPEND`] sentinel.
pub fn is_suspend(value: &Value) -> bool {
    value.as_str() == Some(SUSPEND)
}

// ---------------------------------------------------------------------------
// Failure payload
// ---------------------------------------------------------------------------

/// Structured description of why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Human-readable error message.
    pub message: String,
    /// Error classification (type name or variant), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Truncated backtrace lines, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backtrace: Vec<String>,
    /// Rendered underlying cause, when the error wraps another one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl JobFailure {
    /// A failure carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            backtrace: Vec::new(),
            cause: None,
        }
    }

    /// Set the error classification.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Attach backtrace lines, keeping at most `depth` of them.
    pub fn with_backtrace<I, S>(mut self, lines: I, depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backtrace = lines.into_iter().take(depth).map(Into::into).collect();
        self
    }

    /// Set the rendered cause.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Incoming payload
// ---------------------------------------------------------------------------

/// Output of an upstream job, handed to its successors at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Upstream job id.
    pub id: String,
    /// Upstream job type.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Upstream output (`None` if it produced nothing).
    pub value: Option<Value>,
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// One DAG node as persisted inside its workflow's job map.
///
/// Edges are recorded symmetrically: if `a` is in `b.incoming` then `b` is in
/// `a.outgoing`. The builder is the only component that creates edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque job id, unique within the workflow.
    pub id: String,
    /// Back-reference to the owning workflow.
    pub workflow_id: Uuid,
    /// Type discriminator used to look up the job's behavior in the registry.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Input data, immutable after creation.
    #[serde(default)]
    pub params: Value,
    /// Ids of the jobs this one depends on.
    #[serde(default)]
    pub incoming: Vec<String>,
    /// Ids of the jobs depending on this one.
    #[serde(default)]
    pub outgoing: Vec<String>,
    /// Result of the job's logic, or the [`SUSPEND`] sentinel.
    #[serde(default)]
    pub output: Option<Value>,
    /// Set once the job fails.
    #[serde(default)]
    pub failure: Option<JobFailure>,
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suspended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a fresh job. A UUIDv7 id is generated when `id` is `None`.
    pub fn new(workflow_id: Uuid, job_type: impl Into<String>, id: Option<String>, params: Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            workflow_id,
            job_type: job_type.into(),
            params,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            output: None,
            failure: None,
            enqueued_at: None,
            started_at: None,
            finished_at: None,
            failed_at: None,
            suspended_at: None,
            resumed_at: None,
        }
    }

    /// Record an inbound edge. Returns false if it was already present.
    pub fn add_incoming(&mut self, from: &str) -> bool {
        push_unique(&mut self.incoming, from)
    }

    /// Record an outbound edge. Returns false if it was already present.
    pub fn add_outgoing(&mut self, to: &str) -> bool {
        push_unique(&mut self.outgoing, to)
    }

    /// Store the job's result.
    pub fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    /// Whether the stored output is the [`SUSPEND`] sentinel.
    pub fn output_is_suspend(&self) -> bool {
        self.output.as_ref().is_some_and(is_suspend)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Mark the job as handed to the dispatch queue.
    ///
    /// Clears every later timestamp so a job can go through another pass.
    pub fn enqueue(&mut self) -> Result<(), JobStateError> {
        if self.is_enqueued() {
            return Err(JobStateError::AlreadyEnqueued(self.id.clone()));
        }
        self.enqueued_at = Some(Utc::now());
        self.started_at = None;
        self.finished_at = None;
        self.failed_at = None;
        self.suspended_at = None;
        self.resumed_at = None;
        Ok(())
    }

    /// Mark the job as picked up by a worker.
    pub fn start(&mut self) -> Result<(), JobStateError> {
        if self.is_started() {
            return Err(JobStateError::AlreadyStarted(self.id.clone()));
        }
        if !self.is_enqueued() {
            return Err(JobStateError::NotEnqueued(self.id.clone()));
        }
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), JobStateError> {
        if self.is_finished() {
            return Err(JobStateError::AlreadyFinished(self.id.clone()));
        }
        if !self.is_started() {
            return Err(self.not_started("finish"));
        }
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job as failed. A failed job is also finished.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), JobStateError> {
        if !self.is_started() {
            return Err(self.not_started("fail"));
        }
        let now = Utc::now();
        self.finished_at = Some(now);
        self.failed_at = Some(now);
        self.failure = Some(failure);
        Ok(())
    }

    /// Park a running job.
    ///
    /// A job that was resumed and parks again starts a new suspension: the
    /// old `resumed_at` is cleared so it can be resumed once more.
    pub fn suspend(&mut self) -> Result<(), JobStateError> {
        if self.is_suspended() {
            return Err(JobStateError::AlreadySuspended(self.id.clone()));
        }
        if !self.is_running() {
            return Err(JobStateError::NotRunning(self.id.clone()));
        }
        self.suspended_at = Some(Utc::now());
        self.resumed_at = None;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), JobStateError> {
        if self.is_resumed() {
            return Err(JobStateError::AlreadyResumed(self.id.clone()));
        }
        if !self.is_suspended() {
            return Err(JobStateError::NotSuspended(self.id.clone()));
        }
        self.resumed_at = Some(Utc::now());
        Ok(())
    }

    fn not_started(&self, action: &'static str) -> JobStateError {
        JobStateError::NotStarted {
            job_id: self.id.clone(),
            action,
        }
    }

    // -----------------------------------------------------------------------
    // Derived predicates
    // -----------------------------------------------------------------------

    pub fn is_enqueued(&self) -> bool {
        self.enqueued_at.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Suspended and not yet resumed.
    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some() && !self.is_resumed()
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed_at.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_finished() && !self.is_suspended()
    }

    /// In flight: enqueued and neither finished nor parked.
    pub fn is_scheduled(&self) -> bool {
        self.is_enqueued() && !self.is_finished() && !self.is_suspended()
    }

    pub fn is_succeeded(&self) -> bool {
        self.is_finished() && !self.is_failed()
    }

    /// A DAG root: no inbound edges.
    pub fn is_initial(&self) -> bool {
        self.incoming.is_empty()
    }

    /// Whether the job can be enqueued now.
    ///
    /// `parent_succeeded` is asked about every incoming job id; an unknown
    /// parent should answer `false`.
    pub fn is_ready_to_start(&self, mut parent_succeeded: impl FnMut(&str) -> bool) -> bool {
        !self.is_running()
            && !self.is_enqueued()
            && !self.is_finished()
            && !self.is_failed()
            && self.incoming.iter().all(|id| parent_succeeded(id))
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) -> bool {
    if ids.iter().any(|existing| existing == id) {
        return false;
    }
    ids.push(id.to_string());
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str) -> JobRecord {
        JobRecord::new(Uuid::nil(), "test_job", Some(id.to_string()), json!({"p": 1}))
    }

    fn started(id: &str) -> JobRecord {
        let mut j = job(id);
        j.enqueue().unwrap();
        j.start().unwrap();
        j
    }

    #[test]
    fn new_job_generates_id_when_absent() {
        let a = JobRecord::new(Uuid::nil(), "t", None, Value::Null);
        let b = JobRecord::new(Uuid::nil(), "t", None, Value::Null);
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert!(a.is_initial());
    }

    #[test]
    fn enqueue_twice_fails_consistently() {
        let mut j = job("a");
        j.enqueue().unwrap();
        let first = j.enqueue().unwrap_err();
        let second = j.enqueue().unwrap_err();
        assert_eq!(first, JobStateError::AlreadyEnqueued("a".to_string()));
        assert_eq!(first, second);
    }

    #[test]
    fn start_requires_enqueue() {
        let mut j = job("a");
        assert_eq!(j.start().unwrap_err(), JobStateError::NotEnqueued("a".to_string()));
        j.enqueue().unwrap();
        j.start().unwrap();
        assert_eq!(j.start().unwrap_err(), JobStateError::AlreadyStarted("a".to_string()));
        assert!(j.is_running());
        assert!(j.is_scheduled());
    }

    #[test]
    fn finish_requires_start_and_is_single_shot() {
        let mut j = job("a");
        j.enqueue().unwrap();
        assert!(matches!(j.finish(), Err(JobStateError::NotStarted { .. })));
        j.start().unwrap();
        j.finish().unwrap();
        assert!(j.is_succeeded());
        assert!(!j.is_running());
        assert!(!j.is_scheduled());
        assert_eq!(j.finish().unwrap_err(), JobStateError::AlreadyFinished("a".to_string()));
    }

    #[test]
    fn fail_sets_finished_and_failure() {
        let mut j = job("a");
        assert!(j.fail(JobFailure::message("boom")).is_err());

        let mut j = started("a");
        j.fail(JobFailure::message("boom").with_kind("io")).unwrap();
        assert!(j.is_finished());
        assert!(j.is_failed());
        assert!(!j.is_succeeded());
        assert_eq!(j.failure.as_ref().unwrap().message, "boom");
        assert_eq!(j.failure.as_ref().unwrap().kind.as_deref(), Some("io"));
    }

    #[test]
    fn suspend_and_resume_cycle() {
        let mut j = job("a");
        j.enqueue().unwrap();
        assert_eq!(j.suspend().unwrap_err(), JobStateError::NotRunning("a".to_string()));
        j.start().unwrap();

        j.suspend().unwrap();
        assert!(j.is_suspended());
        assert!(!j.is_running());
        assert!(!j.is_scheduled());
        assert_eq!(j.suspend().unwrap_err(), JobStateError::AlreadySuspended("a".to_string()));

        j.resume().unwrap();
        assert!(!j.is_suspended());
        assert!(j.is_resumed());
        assert!(j.is_running());
        assert_eq!(j.resume().unwrap_err(), JobStateError::AlreadyResumed("a".to_string()));

        j.finish().unwrap();
        assert!(j.is_succeeded());
    }

    #[test]
    fn resumed_job_can_suspend_again() {
        let mut j = started("a");
        j.suspend().unwrap();
        j.resume().unwrap();

        j.suspend().unwrap();
        assert!(j.is_suspended());
        assert!(!j.is_resumed());
        assert!(!j.is_scheduled());

        j.resume().unwrap();
        assert!(j.is_running());
        j.finish().unwrap();
        assert!(j.is_succeeded());
    }

    #[test]
    fn resume_requires_suspension() {
        let mut j = started("a");
        assert_eq!(j.resume().unwrap_err(), JobStateError::NotSuspended("a".to_string()));
    }

    #[test]
    fn enqueue_after_pass_clears_timestamps() {
        let mut j = started("a");
        j.finish().unwrap();
        j.enqueued_at = None;
        j.enqueue().unwrap();
        assert!(j.started_at.is_none());
        assert!(j.finished_at.is_none());
        assert!(j.failed_at.is_none());
        assert!(j.suspended_at.is_none());
        assert!(j.resumed_at.is_none());
    }

    #[test]
    fn ready_to_start_matches_definition() {
        let mut j = job("c");
        j.add_incoming("a");
        j.add_incoming("b");

        assert!(j.is_ready_to_start(|_| true));
        assert!(!j.is_ready_to_start(|id| id == "a"));

        j.enqueue().unwrap();
        assert!(!j.is_ready_to_start(|_| true));
    }

    #[test]
    fn edges_are_deduplicated() {
        let mut j = job("a");
        assert!(j.add_outgoing("b"));
        assert!(!j.add_outgoing("b"));
        assert!(j.add_outgoing("c"));
        assert_eq!(j.outgoing, vec!["b", "c"]);
    }

    #[test]
    fn suspend_sentinel_detection() {
        let mut j = job("a");
        assert!(!j.output_is_suspend());
        j.set_output(json!(SUSPEND));
        assert!(j.output_is_suspend());
        j.set_output(json!({"status": "suspend"}));
        assert!(!j.output_is_suspend());
    }

    #[test]
    fn serialized_representation_uses_stored_keys() {
        let mut j = started("a");
        j.add_outgoing("b");
        j.set_output(json!(42));
        let value = serde_json::to_value(&j).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "id",
            "workflow_id",
            "type",
            "params",
            "incoming",
            "outgoing",
            "output",
            "failure",
            "enqueued_at",
            "started_at",
            "finished_at",
            "failed_at",
            "suspended_at",
            "resumed_at",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj["type"], json!("test_job"));
    }

    #[test]
    fn serialization_roundtrip_preserves_predicates() {
        let mut j = started("a");
        j.suspend().unwrap();
        j.add_incoming("root");

        let json = serde_json::to_string(&j).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, j);
        assert_eq!(back.is_suspended(), j.is_suspended());
        assert_eq!(back.is_running(), j.is_running());
        assert_eq!(back.is_scheduled(), j.is_scheduled());
        assert_eq!(back.is_initial(), j.is_initial());
    }

    #[test]
    fn failure_backtrace_is_truncated() {
        let lines = (0..30).map(|i| format!("frame {i}"));
        let failure = JobFailure::message("x").with_backtrace(lines, 10);
        assert_eq!(failure.backtrace.len(), 10);
        assert_eq!(failure.backtrace[0], "frame 0");
    }
}
