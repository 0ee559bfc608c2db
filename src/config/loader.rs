//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> ConfigResult<GatewayConfig> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> ConfigResult<GatewayConfig> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SelectionStrategy;
    use std::io::Write;

    #[test]
    fn loads_partial_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[admin]
api_key = "k"

[pool]
default_strategy = "round_robin"

[rate_limit]
tenant_max_requests = 5
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pool.default_strategy, SelectionStrategy::RoundRobin);
        assert_eq!(config.rate_limit.tenant_max_requests, 5);
        assert_eq!(config.rate_limit.global_max_requests, 1000);
        assert_eq!(config.queue.workers, 5);
    }

    #[test]
    fn reports_validation_errors() {
        let err = parse_config("[admin]\napi_key = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref v) if v.len() == 1));
        assert!(err.to_string().contains("admin.api_key"));
    }

    #[test]
    fn reports_parse_errors() {
        assert!(matches!(parse_config("[queue\nworkers = 1"), Err(ConfigError::Parse(_))));
        assert!(matches!(load_config(Path::new("/nonexistent/gateway.toml")), Err(ConfigError::Io(_))));
    }
}
