//! Engine configuration types for jobgraph.
//!
//! `EngineConfig` represents the top-level `jobgraph.toml` that controls the
//! worker pool, the dispatch queue, and failure reporting.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
///
/// Loaded from `{data_dir}/jobgraph.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs a worker pool executes at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capacity of the in-process dispatch queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of backtrace lines kept in a job failure.
    #[serde(default = "default_backtrace_depth")]
    pub backtrace_depth: usize,

    /// SQLite URL for the workflow store. Derived from the data dir when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_concurrency() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_backtrace_depth() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            backtrace_depth: default_backtrace_depth(),
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backtrace_depth, 10);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_engine_config_partial_toml() {
        let config: EngineConfig = toml::from_str("concurrency = 12").unwrap();
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backtrace_depth, 10);
    }

    #[test]
    fn test_engine_config_toml_roundtrip() {
        let config = EngineConfig {
            concurrency: 2,
            queue_capacity: 16,
            backtrace_depth: 3,
            database_url: Some("sqlite://jobs.db".to_string()),
        };
        let text = toml::to_string(&config).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
