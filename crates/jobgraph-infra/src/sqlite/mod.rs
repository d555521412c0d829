//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod pool;
pub mod workflow;

pub use pool::DatabasePool;
pub use workflow::SqliteWorkflowStore;
