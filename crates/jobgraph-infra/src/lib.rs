//! Infrastructure layer for jobgraph.
//!
//! Contains implementations of the ports defined in `jobgraph-core`:
//! SQLite workflow storage, configuration loading, and engine assembly.

pub mod config;
pub mod engine;
pub mod sqlite;
