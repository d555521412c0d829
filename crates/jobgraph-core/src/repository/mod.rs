//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (jobgraph-infra) implements. The core crate never depends on any
//! specific storage technology. An in-memory implementation lives here for
//! embedding and tests.

pub mod lock;
pub mod memory;
pub mod workflow;

pub use lock::{WorkflowLock, WorkflowLocks};
pub use memory::MemoryWorkflowStore;
pub use workflow::WorkflowStore;
