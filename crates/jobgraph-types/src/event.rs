//! Lifecycle events published by the workflow manager.
//!
//! Events are emitted after the transaction that produced them has been
//! persisted, so a subscriber never observes a state that could still roll back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A workflow or job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted { workflow_id: Uuid },
    WorkflowResumed { workflow_id: Uuid },
    WorkflowSucceeded { workflow_id: Uuid },
    WorkflowFailed { workflow_id: Uuid, failures: usize },
    WorkflowSuspended { workflow_id: Uuid },
    WorkflowCancelled { workflow_id: Uuid },
    JobEnqueued { workflow_id: Uuid, job_id: String },
    JobResumed { workflow_id: Uuid, job_id: String },
    JobFinished { workflow_id: Uuid, job_id: String },
    JobFailed { workflow_id: Uuid, job_id: String, message: String },
    JobSuspended { workflow_id: Uuid, job_id: String },
    /// A running job added jobs to its workflow's graph.
    GraphExtended { workflow_id: Uuid, anchor_id: String, added: Vec<String> },
}

impl WorkflowEvent {
    /// The workflow the event belongs to.
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id }
            | WorkflowEvent::WorkflowResumed { workflow_id }
            | WorkflowEvent::WorkflowSucceeded { workflow_id }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowSuspended { workflow_id }
            | WorkflowEvent::WorkflowCancelled { workflow_id }
            | WorkflowEvent::JobEnqueued { workflow_id, .. }
            | WorkflowEvent::JobResumed { workflow_id, .. }
            | WorkflowEvent::JobFinished { workflow_id, .. }
            | WorkflowEvent::JobFailed { workflow_id, .. }
            | WorkflowEvent::JobSuspended { workflow_id, .. }
            | WorkflowEvent::GraphExtended { workflow_id, .. } => *workflow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_tag() {
        let event = WorkflowEvent::JobEnqueued {
            workflow_id: Uuid::nil(),
            job_id: "job1".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("job_enqueued"));
        assert_eq!(value["job_id"], json!("job1"));
        assert_eq!(event.workflow_id(), Uuid::nil());
    }
}
