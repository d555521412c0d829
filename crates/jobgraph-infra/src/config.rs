//! Engine configuration loader for jobgraph.
//!
//! Reads `jobgraph.toml` from the data directory (`~/.jobgraph/` in
//! production) and deserializes it into [`EngineConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::Path;

use jobgraph_types::config::EngineConfig;

use crate::sqlite::pool::database_url_for;

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "jobgraph.toml";

/// Load engine configuration from `{data_dir}/jobgraph.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// The configured database URL, or `jobgraph.db` inside `data_dir`.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_for(data_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
concurrency = 12
backtrace_depth = 3
database_url = "sqlite:///var/lib/jobgraph/jobs.db"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.concurrency, 12);
        assert_eq!(config.backtrace_depth, 3);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(
            config.database_url.as_deref(),
            Some("sqlite:///var/lib/jobgraph/jobs.db")
        );
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "concurrency = [not valid")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn resolve_database_url_prefers_config() {
        let dir = Path::new("/data");
        let mut config = EngineConfig::default();
        assert_eq!(resolve_database_url(&config, dir), "sqlite:///data/jobgraph.db");

        config.database_url = Some("sqlite::memory:".into());
        assert_eq!(resolve_database_url(&config, dir), "sqlite::memory:");
    }
}
