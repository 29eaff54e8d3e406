use super::{ConfigError, Result};
use serde::{Deserialize, Serialize};

const URL_ENV_VARS: &[&str] = &["TAUTULLI_URL", "TAUTULLI_BASE_URL"];
const KEY_ENV_VARS: &[&str] = &["TAUTULLI_API_KEY", "TAUTULLI_APIKEY", "TAUTULLI_TOKEN"];

/// Connection details for a Tautulli instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TautulliConfig {
    /// Base URL of Tautulli instance (e.g., "<http://localhost:8181>")
    pub url: String,

    /// API key for authentication
    pub api_key: String,
}

impl TautulliConfig {
    /// Resolve URL and key from stored settings, letting environment variables win.
    ///
    /// `lookup` is the environment accessor (`std::env::var(..).ok()` in production).
    pub fn resolve<F>(stored_url: &str, stored_key: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first_env = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };

        let url = first_env(URL_ENV_VARS).unwrap_or_else(|| stored_url.to_string());
        let api_key = first_env(KEY_ENV_VARS).unwrap_or_else(|| stored_key.to_string());

        Self {
            url: url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }
}

/// Tunables for history aggregation.
///
/// The millisecond thresholds are empirical: Tautulli mixes seconds and
/// milliseconds depending on the row type and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Rows requested per history page (default: 1000)
    pub page_length: u32,

    /// Upper bound on pages fetched per summary (default: 25)
    pub max_pages: u32,

    /// Timeout for a single page fetch, in seconds (default: 5)
    pub fetch_timeout_secs: u64,

    /// Timestamps at or above this value are milliseconds (default: 10^12)
    pub ms_timestamp_threshold: i64,

    /// Durations above this value are milliseconds (default: 3 days in seconds)
    pub ms_duration_threshold: u64,

    /// Lookback used when a request gives no valid day count (default: 7)
    pub default_days: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            page_length: 1000,
            max_pages: 25,
            fetch_timeout_secs: 5,
            ms_timestamp_threshold: 1_000_000_000_000,
            ms_duration_threshold: 259_200,
            default_days: 7,
        }
    }
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than 0".to_string(),
                })
            } else {
                Ok(())
            }
        };

        positive("aggregation.page_length", u64::from(self.page_length))?;
        positive("aggregation.max_pages", u64::from(self.max_pages))?;
        positive("aggregation.fetch_timeout_secs", self.fetch_timeout_secs)?;
        positive("aggregation.default_days", u64::from(self.default_days))?;

        if self.ms_timestamp_threshold <= 0 {
            return Err(ConfigError::Invalid {
                field: "aggregation.ms_timestamp_threshold",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
