//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::SniffwireConfig;
use crate::config::validation::{validate_config, ValidationError};

/// File read when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".sniffwire.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse a TOML document. Semantic checks are left to the caller.
pub fn parse_config(content: &str) -> Result<SniffwireConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a config file without validating it.
pub fn read_config(path: &Path) -> Result<SniffwireConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SniffwireConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// `$HOME/.sniffwire.toml`, if `HOME` is set.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_FILE))
}

/// Read the explicit file, or the default file when it exists, or fall
/// back to built-in defaults. Not validated.
pub fn resolve_config(explicit: Option<&Path>) -> Result<SniffwireConfig, ConfigError> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            tracing::debug!(path = %path.display(), "Using default config file");
            read_config(&path)
        }
        _ => Ok(SniffwireConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_io_error() {
        let err = read_config(Path::new("/nonexistent/sniffwire.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(parse_config("target_port = ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let path = std::env::temp_dir().join(format!("sniffwire-invalid-{}.toml", std::process::id()));
        fs::write(&path, "target_port = 0\n").unwrap();
        let result = load_config(&path);
        fs::remove_file(&path).unwrap();

        match result {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors[0].field, "target_port"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
