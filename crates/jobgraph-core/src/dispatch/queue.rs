//! In-process dispatch queue over a tokio mpsc channel.

use tokio::sync::mpsc;

use super::{DispatchError, DispatchRequest, Dispatcher};

/// [`Dispatcher`] that pushes requests onto a bounded channel consumed by a
/// [`crate::worker::WorkerPool`].
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    sender: mpsc::Sender<DispatchRequest>,
}

impl QueueDispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl Dispatcher for QueueDispatcher {
    async fn enqueue(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        tracing::trace!(workflow_id = %request.workflow_id, job_id = %request.job_id, "dispatching job");
        self.sender
            .send(request)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}
