//! Per-workflow mutual exclusion.
//!
//! Every read-modify-write of a workflow record happens while holding that
//! workflow's lock. Locks are keyed by workflow id and held as owned tokio
//! mutex guards so they can live across `.await` points.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

/// Guard for one workflow's lock.
///
/// Dropping the last guard for a workflow removes its table entry.
#[derive(Debug)]
pub struct WorkflowLock {
    workflow_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl WorkflowLock {
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }
}

impl Drop for WorkflowLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own handle left: nobody holds or waits on it.
        // `entry` in `acquire` clones under the same shard lock, so a new
        // waiter either keeps the entry alive or gets a fresh mutex.
        self.table
            .remove_if(&self.workflow_id, |_, mutex| Arc::strong_count(mutex) == 1);
        tracing::trace!(workflow_id = %self.workflow_id, "workflow lock released");
    }
}

/// Process-wide table of workflow locks.
#[derive(Debug, Clone, Default)]
pub struct WorkflowLocks {
    locks: Arc<LockTable>,
}

impl WorkflowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `workflow_id`.
    pub async fn acquire(&self, workflow_id: Uuid) -> WorkflowLock {
        // The map shard guard must be dropped before awaiting.
        let mutex = self.locks.entry(workflow_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        tracing::trace!(workflow_id = %workflow_id, "workflow lock acquired");
        WorkflowLock {
            workflow_id,
            guard: Some(guard),
            table: self.locks.clone(),
        }
    }

    /// Number of workflows currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_exclusive_per_workflow() {
        let locks = WorkflowLocks::new();
        let id = Uuid::now_v7();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _lock = locks.acquire(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_workflows_do_not_block() {
        let locks = WorkflowLocks::new();
        let a = locks.acquire(Uuid::now_v7()).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(Uuid::now_v7())).await;
        assert!(b.is_ok());
        drop(a);
    }

    #[tokio::test]
    async fn test_released_locks_leave_no_entries() {
        let locks = WorkflowLocks::new();
        for _ in 0..1000 {
            drop(locks.acquire(Uuid::now_v7()).await);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_waited_on() {
        let locks = WorkflowLocks::new();
        let id = Uuid::now_v7();
        let held = locks.acquire(id).await;
        let _other = locks.acquire(Uuid::now_v7()).await;
        assert_eq!(locks.len(), 2);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let lock = locks.acquire(id).await;
                let entries = locks.len();
                drop(lock);
                entries
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap(), 2);
        assert_eq!(locks.len(), 1);
    }
}
