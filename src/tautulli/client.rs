use super::aggregator::PageFetcher;
use super::envelope::{extract_rows, shape_hint};
use crate::config::TautulliConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const SERVICE: &str = "Tautulli";

/// Add a scheme when missing and make sure the URL ends with a single `/`
pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if lazy_regex::regex_is_match!(r"(?i)^https?://", trimmed) {
        format!("{trimmed}/")
    } else {
        format!("http://{trimmed}/")
    }
}

/// First part of an error body, for messages
pub(crate) fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        let cut: String = body.chars().take(200).collect();
        format!(" - {cut}")
    }
}

/// Tautulli API client
pub struct TautulliClient {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: Client,
}

impl TautulliClient {
    /// Create new Tautulli client. Fails without network access when URL or key is missing.
    pub fn new(config: &TautulliConfig, timeout: Duration) -> Result<Self> {
        if !config.is_configured() {
            return Err(AppError::NotConfigured { service: SERVICE });
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::External(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: normalize_base_url(&config.url),
            api_key: config.api_key.clone(),
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    /// Issue an API command and return its `response.data` payload
    pub async fn call(&self, cmd: &str, params: &[(&str, String)]) -> Result<Value> {
        tracing::debug!("Calling Tautulli command {cmd}");

        let url = format!("{}api/v2", self.base_url);
        let mut query: Vec<(&str, &str)> = vec![("apikey", self.api_key.as_str()), ("cmd", cmd)];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::from_request(SERVICE, self.timeout_secs, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::from_request(SERVICE, self.timeout_secs, &e))?;

        if !status.is_success() {
            return Err(AppError::External(format!(
                "Tautulli API returned error status: {status}{}",
                excerpt(&body)
            )));
        }

        tracing::trace!("Tautulli {cmd} response: {body}");

        let doc: Value = serde_json::from_str(&body).map_err(|e| {
            tracing::debug!(
                "Response body (first 1000 chars): {}",
                body.chars().take(1000).collect::<String>()
            );
            AppError::External(format!("Failed to parse Tautulli response: {e}"))
        })?;

        unwrap_envelope(doc)
    }

    /// Fetch one page of history, newest first
    pub async fn get_history_page(&self, after: i64, start: u32, length: u32) -> Result<Vec<Value>> {
        let mut params = vec![
            ("order_column", "date".to_string()),
            ("order_dir", "desc".to_string()),
            ("start", start.to_string()),
            ("length", length.to_string()),
        ];
        // Tautulli filters `after` by calendar date, so the hint is a superset of the window
        if let Some(date) = chrono::DateTime::from_timestamp(after, 0) {
            params.push(("after", date.format("%Y-%m-%d").to_string()));
        }

        let data = self.call("get_history", &params).await?;

        match extract_rows(&data) {
            Some(rows) => {
                tracing::debug!("Fetched {} history rows (start {start})", rows.len());
                Ok(rows.to_vec())
            }
            None => {
                tracing::warn!(
                    "Unrecognized Tautulli history shape ({}), treating as empty page",
                    shape_hint(&data)
                );
                Ok(Vec::new())
            }
        }
    }

    /// Current activity; used as the connection test
    pub async fn get_activity(&self) -> Result<ActivityInfo> {
        let data = self.call("get_activity", &[]).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Server identity, for health checks
    pub async fn get_server_info(&self) -> Result<ServerInfo> {
        let data = self.call("get_server_info", &[]).await?;
        let info: ServerInfo = serde_json::from_value(data)?;
        tracing::info!(
            "Tautulli reachable: {} (version {})",
            info.pms_name,
            info.pms_version
        );
        Ok(info)
    }

    /// Home statistics blocks (top movies, shows, platforms, ...) passed through to the UI
    pub async fn get_home_stats(&self, days: u32) -> Result<Value> {
        let params = [
            ("time_range", days.to_string()),
            ("stats_type", "0".to_string()),
            ("stats_count", "25".to_string()),
            ("grouping", "0".to_string()),
        ];
        self.call("get_home_stats", &params).await
    }
}

#[async_trait]
impl PageFetcher for TautulliClient {
    async fn fetch_page(&self, after: i64, start: u32, length: u32) -> Result<Vec<Value>> {
        self.get_history_page(after, start, length).await
    }
}

/// Strip the `{"response": {...}}` wrapper, turning API-level errors into `Err`
fn unwrap_envelope(doc: Value) -> Result<Value> {
    if doc.get("response").is_none() {
        return Ok(doc);
    }

    let envelope: TautulliResponse = serde_json::from_value(doc)
        .map_err(|e| AppError::External(format!("Unexpected response from Tautulli: {e}")))?;

    match envelope.response.result {
        ResponseResult::Success => Ok(envelope.response.data),
        ResponseResult::Error => Err(AppError::External(format!(
            "Tautulli API returned error: {}",
            envelope
                .response
                .message
                .unwrap_or_else(|| "Unknown error".to_string())
        ))),
    }
}

// API Response structures

#[derive(Debug, Deserialize)]
struct TautulliResponse {
    response: ResponseWrapper,
}

#[derive(Debug, Deserialize)]
struct ResponseWrapper {
    result: ResponseResult,
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResponseResult {
    Success,
    Error,
}

/// Server identity reported by `get_server_info`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub pms_name: String,
    #[serde(default)]
    pub pms_version: String,
}

/// Subset of `get_activity` used by the connection test
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityInfo {
    #[serde(default, deserialize_with = "deserialize_optional_count")]
    stream_count: Option<u32>,
    #[serde(default)]
    sessions: Vec<Value>,
}

impl ActivityInfo {
    pub fn stream_count(&self) -> u32 {
        self.stream_count
            .unwrap_or_else(|| u32::try_from(self.sessions.len()).unwrap_or(u32::MAX))
    }
}

// Tautulli may return counts as strings or actual numbers
fn deserialize_optional_count<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct CountVisitor;

    impl Visitor<'_> for CountVisitor {
        type Value = Option<u32>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or number representing a count")
        }

        fn visit_unit<E>(self) -> std::result::Result<Option<u32>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Option<u32>, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map(Some).map_err(de::Error::custom)
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Option<u32>, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map(Some).map_err(de::Error::custom)
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Option<u32>, E>
        where
            E: de::Error,
        {
            if value.is_empty() {
                Ok(None)
            } else {
                value.parse::<u32>().map(Some).map_err(de::Error::custom)
            }
        }
    }

    deserializer.deserialize_any(CountVisitor)
}
