//! Lifecycle event bus.
//!
//! Provides an `EventBus` that distributes `WorkflowEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel. The manager publishes
//! only after a transaction has committed.

pub mod bus;

pub use bus::EventBus;
