//! Pool configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.buildpool/` in
//! production) and deserializes it into [`PoolConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::Path;

use buildpool_types::config::PoolConfig;

/// Load pool configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`PoolConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config, with defaults for omitted fields.
pub async fn load_pool_config(data_dir: &Path) -> PoolConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return PoolConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return PoolConfig::default();
        }
    };

    match toml::from_str::<PoolConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            PoolConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_pool_config(tmp.path()).await;
        assert_eq!(config.mutation.evolve_threshold, 3);
        assert_eq!(config.sync.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults_for_the_rest() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
authority_url = "https://pool.example.com"

[selection]
exploit_ratio = 0.5

[mutation.weights]
prompt_tweak = 10
structure_change = 10
reference_swap = 10
hybrid = 70

[rewriter]
command = "rewrite-skill"
args = ["--model", "fast"]
"#,
        )
        .await
        .unwrap();

        let config = load_pool_config(tmp.path()).await;
        assert_eq!(config.authority_url, "https://pool.example.com");
        assert!((config.selection.exploit_ratio - 0.5).abs() < f64::EPSILON);
        assert!((config.selection.zero_fitness_epsilon - 1e-4).abs() < f64::EPSILON);
        assert_eq!(config.mutation.weights.hybrid, 70);
        assert_eq!(config.mutation.evolve_threshold, 3);
        assert_eq!(config.rewriter.command.as_deref(), Some("rewrite-skill"));
        assert_eq!(config.rewriter.args, vec!["--model", "fast"]);
        assert_eq!(config.validation.max_retries, 2);
    }

    #[tokio::test]
    async fn test_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_pool_config(tmp.path()).await;
        assert_eq!(config.authority_url, PoolConfig::default().authority_url);
    }
}
