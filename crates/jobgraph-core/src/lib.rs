//! Orchestration engine and port definitions for jobgraph.
//!
//! This crate defines the "ports" (store and dispatch traits) that the
//! infrastructure layer implements, plus the engine itself:
//! - `job` -- the `Job` capability trait, execution context, and type registry
//! - `builder` -- compiles declarative job/edge declarations into a DAG
//! - `manager` -- lock-guarded lifecycle transitions and completion analysis
//! - `worker` -- the dispatch-boundary invocation and a concurrent worker pool
//!
//! It depends only on `jobgraph-types` -- never on `jobgraph-infra` or any
//! database crate.

pub mod builder;
pub mod dispatch;
pub mod event;
pub mod job;
pub mod manager;
pub mod repository;
pub mod worker;
