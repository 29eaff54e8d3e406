use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = ConfigError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let msg = format!("{err}");
        assert!(msg.contains("Failed to read config file"));
    }

    #[test]
    fn test_error_display_invalid() {
        let err = ConfigError::Invalid {
            field: "aggregation.page_length",
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("aggregation.page_length"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_error_display_not_found() {
        let err = ConfigError::NotFound {
            path: PathBuf::from("/etc/plexletter/config.json"),
        };
        assert!(format!("{err}").contains("/etc/plexletter/config.json"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: ConfigError = json_err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
