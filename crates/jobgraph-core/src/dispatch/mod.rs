//! Dispatch port: how enqueued jobs reach workers.
//!
//! The manager emits a [`DispatchRequest`] for every job it enqueues or
//! resumes, always after the workflow record has been committed and its
//! lock released. Any queue that delivers requests to
//! [`crate::worker::Worker::invoke`] can implement [`Dispatcher`].

pub mod queue;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use queue::QueueDispatcher;

/// Work item handed to the dispatch queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub workflow_id: Uuid,
    pub job_id: String,
    /// Present when the job is being resumed rather than run for the first time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_data: Option<Value>,
}

impl DispatchRequest {
    pub fn run(workflow_id: Uuid, job_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            job_id: job_id.into(),
            resume_data: None,
        }
    }

    pub fn resume(workflow_id: Uuid, job_id: impl Into<String>, data: Value) -> Self {
        Self {
            workflow_id,
            job_id: job_id.into(),
            resume_data: Some(data),
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume_data.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    Closed,

    #[error("dispatch failed: {0}")]
    Other(String),
}

/// Sink for dispatch requests.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Dispatcher: Send + Sync {
    fn enqueue(
        &self,
        request: DispatchRequest,
    ) -> impl std::future::Future<Output = Result<(), DispatchError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let id = Uuid::now_v7();
        let run = serde_json::to_value(DispatchRequest::run(id, "a")).unwrap();
        assert!(run.get("resume_data").is_none());

        let resume = DispatchRequest::resume(id, "a", json!({"ok": true}));
        assert!(resume.is_resume());
        let back: DispatchRequest =
            serde_json::from_value(serde_json::to_value(&resume).unwrap()).unwrap();
        assert_eq!(back, resume);
    }
}
