//! Shared domain types for jobgraph.
//!
//! This crate contains the persisted records of the workflow engine: the
//! serialized job node (`JobRecord`), the workflow aggregate (`WorkflowRecord`),
//! their lifecycle state machines, failure records, lifecycle events, and the
//! engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod workflow;
