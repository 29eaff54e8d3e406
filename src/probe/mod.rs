mod plex;
mod smtp;

pub use plex::{PlexClient, PlexIdentity, PlexItem, PlexKind};
pub use smtp::{Delivery, Mailer, OutgoingEmail, Security, SmtpSettings, TEST_SUBJECT};

use crate::config::TautulliConfig;
use crate::error::{AppError, Result};
use crate::tautulli::TautulliClient;
use serde::Serialize;
use std::time::Duration;

/// Connection tests give up after this long
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a connection test, as returned to the settings UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_count: Option<u32>,
}

impl ProbeOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            stream_count: None,
        }
    }

    #[must_use]
    pub fn with_stream_count(mut self, count: u32) -> Self {
        self.stream_count = Some(count);
        self
    }
}

impl<T> From<Result<T>> for ProbeOutcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(e) => Self::failure(e),
        }
    }
}

pub async fn probe_plex(url: &str, token: &str) -> ProbeOutcome {
    if url.trim().is_empty() || token.trim().is_empty() {
        return ProbeOutcome::failure("Missing plexUrl or plexToken");
    }

    let result = async {
        PlexClient::new(url, token, PROBE_TIMEOUT)?
            .identity()
            .await
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!("Plex test failed: {e}");
    }
    result.into()
}

pub async fn probe_tautulli(config: &TautulliConfig) -> ProbeOutcome {
    if !config.is_configured() {
        return ProbeOutcome::failure("Missing tautulliUrl or tautulliApiKey");
    }

    let result = async {
        TautulliClient::new(config, PROBE_TIMEOUT)?
            .get_activity()
            .await
    }
    .await;

    match result {
        Ok(activity) => ProbeOutcome::success().with_stream_count(activity.stream_count()),
        Err(e) => {
            tracing::warn!("Tautulli test failed: {e}");
            ProbeOutcome::failure(e)
        }
    }
}

/// Verify the SMTP server and, when a recipient is given, send a test message
pub async fn probe_smtp(settings: &SmtpSettings, to: Option<&str>) -> ProbeOutcome {
    let result = async {
        let mailer = Mailer::new(settings.clone())?;
        mailer.verify().await?;
        if let Some(to) = to.filter(|to| !to.trim().is_empty()) {
            mailer.send_test(to).await?;
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!("SMTP test failed: {e}");
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(ProbeOutcome::success().with_stream_count(2))
            .expect("Should serialize");
        assert_eq!(value, json!({"ok": true, "streamCount": 2}));

        let value = serde_json::to_value(ProbeOutcome::failure("Timeout reaching Plex (5s)"))
            .expect("Should serialize");
        assert_eq!(value, json!({"ok": false, "error": "Timeout reaching Plex (5s)"}));
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: ProbeOutcome = Result::Ok(()).into();
        assert!(ok.ok);

        let failed: ProbeOutcome = Result::<()>::Err(AppError::NotConfigured { service: "Plex" }).into();
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("Plex not configured"));
    }

    #[tokio::test]
    async fn test_probe_plex_missing_settings() {
        let outcome = probe_plex("http://plex:32400", " ").await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("Missing plexUrl or plexToken"));
    }

    #[tokio::test]
    async fn test_probe_tautulli_missing_settings() {
        let outcome = probe_tautulli(&TautulliConfig::default()).await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("Missing tautulliUrl or tautulliApiKey")
        );
    }

    #[tokio::test]
    async fn test_probe_smtp_validation() {
        let outcome = probe_smtp(&SmtpSettings::default(), None).await;
        assert_eq!(outcome.error.as_deref(), Some("Missing SMTP server/port"));
    }

    #[tokio::test]
    async fn test_probe_tautulli_stream_count() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v2")
                    .query_param("cmd", "get_activity");
                then.status(200).json_body(json!({
                    "response": {
                        "result": "success",
                        "message": null,
                        "data": {"stream_count": "3", "sessions": []}
                    }
                }));
            })
            .await;

        let config = TautulliConfig {
            url: server.base_url(),
            api_key: "key".to_string(),
        };
        let outcome = probe_tautulli(&config).await;
        assert!(outcome.ok);
        assert_eq!(outcome.stream_count, Some(3));
    }
}
