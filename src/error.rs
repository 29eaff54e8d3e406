use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{service} not configured")]
    NotConfigured { service: &'static str },

    #[error("Timeout reaching {service} ({secs}s)")]
    Timeout { service: &'static str, secs: u64 },

    /// Required settings are absent; the message is shown to the user as is
    #[error("{0}")]
    Incomplete(&'static str),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("External service error: {0}")]
    External(String),
}

impl AppError {
    /// Map a reqwest failure, keeping timeouts distinguishable
    pub fn from_request(service: &'static str, secs: u64, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service, secs }
        } else {
            Self::External(format!("Failed to reach {service}: {err}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
