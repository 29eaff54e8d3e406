use super::AppState;
use crate::config::{Service, SettingsUpdate, StatusView, TautulliConfig};
use crate::error::AppError;
use crate::probe::{
    self, Mailer, OutgoingEmail, PROBE_TIMEOUT, PlexClient, PlexKind, ProbeOutcome, SmtpSettings,
};
use crate::tautulli::{SummaryReport, TautulliClient, build_report};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const MISSING_SMTP_SETTINGS: &str = "Missing SMTP settings (host, port, secure, username, password)";
const MISSING_EMAIL_FIELDS: &str = "Missing email fields (from, to, subject, html|text)";

#[derive(Debug, Deserialize)]
pub(super) struct DaysQuery {
    days: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Request bodies are optional and parsed leniently; anything unparsable reads as no fields
fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn body_string(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Whole days >= 1; anything else falls back to the configured default
fn parse_days(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|d| d.trim().parse::<i64>().ok())
        .filter(|d| *d >= 1)
        .map_or(default, |d| u32::try_from(d).unwrap_or(u32::MAX))
}

fn body_text(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Connection settings carried by a relay request; every field is required
fn relay_settings(body: &Value) -> Option<SmtpSettings> {
    let port = match body.get("port")? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|p| *p != 0)?;
    let secure = match body.get("secure")? {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => return None,
    };

    Some(SmtpSettings {
        host: body_string(body, "host")?,
        port,
        secure,
        user: body_string(body, "username")?,
        pass: body_text(body, "password")?,
        from: String::new(),
    })
}

/// `to` may be a comma separated string or an array of addresses
fn relay_email(body: &Value) -> Option<OutgoingEmail> {
    let to: Vec<&str> = match body.get("to")? {
        Value::String(s) => s.split(',').collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let to: Vec<String> = to
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let html = body_text(body, "html");
    let text = body_text(body, "text");
    if to.is_empty() || (html.is_none() && text.is_none()) {
        return None;
    }

    Some(OutgoingEmail {
        from: body_string(body, "from")?,
        to,
        subject: body_string(body, "subject")?,
        html,
        text,
    })
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "error": message})),
    )
        .into_response()
}

fn error_response(err: &AppError) -> Response {
    let status = match err {
        AppError::NotConfigured { .. } | AppError::Incomplete(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Timeout { .. } | AppError::External(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"ok": false, "error": err.to_string()}))).into_response()
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

pub(super) async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.store.lock().await.public_view())
}

pub(super) async fn post_config(State(state): State<AppState>, body: Bytes) -> Response {
    let update = SettingsUpdate::from_value(&json_body(&body));

    let mut store = state.store.lock().await;
    store.apply_update(&update);
    match store.save() {
        Ok(()) => {
            tracing::info!("Settings updated");
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to save settings: {e}");
            error_response(&e.into())
        }
    }
}

pub(super) async fn get_status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.store.lock().await.status())
}

pub(super) async fn test_plex(State(state): State<AppState>, body: Bytes) -> Json<ProbeOutcome> {
    let body = json_body(&body);
    let settings = state.settings().await;
    let url = body_string(&body, "plexUrl").unwrap_or(settings.plex_url);
    let token = body_string(&body, "plexToken").unwrap_or(settings.plex_token);

    let outcome = probe::probe_plex(&url, &token).await;
    state.record_test(Service::Plex, outcome.ok).await;
    Json(outcome)
}

pub(super) async fn test_tautulli(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<ProbeOutcome> {
    let body = json_body(&body);
    let stored = state.settings().await.tautulli_config();
    let config = TautulliConfig {
        url: body_string(&body, "tautulliUrl")
            .map_or(stored.url, |url| url.trim_end_matches('/').to_string()),
        api_key: body_string(&body, "tautulliApiKey").unwrap_or(stored.api_key),
    };

    let outcome = probe::probe_tautulli(&config).await;
    state.record_test(Service::Tautulli, outcome.ok).await;
    Json(outcome)
}

/// Verify SMTP with the stored settings overlaid by the request; persist the overlay on success
pub(super) async fn test_email(State(state): State<AppState>, body: Bytes) -> Json<ProbeOutcome> {
    let body = json_body(&body);
    let update = SettingsUpdate::from_value(&body).smtp_only();
    let to = body_string(&body, "to");

    let mut merged = state.settings().await;
    update.apply_to(&mut merged);

    let outcome = probe::probe_smtp(&merged.smtp_settings(), to.as_deref()).await;

    {
        let mut store = state.store.lock().await;
        if outcome.ok {
            store.apply_update(&update);
        }
        if let Err(e) = store.record_test(Service::Smtp, outcome.ok) {
            tracing::warn!("Failed to persist SMTP test result: {e}");
        }
    }

    Json(outcome)
}

/// Relay a caller-composed message through caller-supplied SMTP settings
pub(super) async fn send_email(body: Bytes) -> Response {
    let body = json_body(&body);
    let Some(settings) = relay_settings(&body) else {
        return bad_request(MISSING_SMTP_SETTINGS);
    };
    let Some(email) = relay_email(&body) else {
        return bad_request(MISSING_EMAIL_FIELDS);
    };

    let result = async {
        let mailer = Mailer::new(SmtpSettings {
            from: email.from.clone(),
            ..settings
        })?;
        mailer.verify().await?;
        mailer.send(&email).await
    }
    .await;

    match result {
        Ok(delivery) => Json(json!({
            "ok": true,
            "messageId": delivery.message_id,
            "accepted": delivery.accepted,
            "rejected": delivery.rejected,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("Relay send failed: {e}");
            error_response(&e)
        }
    }
}

pub(super) async fn tautulli_summary(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Json<SummaryReport> {
    let settings = state.settings().await;
    let days = parse_days(query.days.as_deref(), settings.aggregation.default_days);

    Json(build_report(&settings.tautulli_config(), &settings.aggregation, days).await)
}

pub(super) async fn tautulli_home(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> Response {
    let settings = state.settings().await;
    let days = parse_days(query.days.as_deref(), settings.aggregation.default_days);
    let timeout = Duration::from_secs(settings.aggregation.fetch_timeout_secs);

    let result = async {
        TautulliClient::new(&settings.tautulli_config(), timeout)?
            .get_home_stats(days)
            .await
    }
    .await;

    match result {
        Ok(home) => Json(json!({"home": home})).into_response(),
        Err(e) => {
            tracing::warn!("Home stats failed: {e}");
            error_response(&e)
        }
    }
}

pub(super) async fn plex_status(State(state): State<AppState>) -> Json<Value> {
    let settings = state.settings().await;
    let result = async {
        PlexClient::new(&settings.plex_url, &settings.plex_token, PROBE_TIMEOUT)?
            .identity()
            .await
    }
    .await;

    Json(match result {
        Ok(identity) => json!({
            "ok": true,
            "machineIdentifier": identity.machine_identifier,
            "version": identity.version,
        }),
        Err(e) => json!({"ok": false, "error": e.to_string()}),
    })
}

pub(super) async fn plex_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
        return Json(json!({"ok": false, "error": "Missing query ?q="})).into_response();
    };
    let kind = query.kind.as_deref().and_then(PlexKind::parse);

    let settings = state.settings().await;
    let result = async {
        PlexClient::new(&settings.plex_url, &settings.plex_token, PROBE_TIMEOUT)?
            .search(q, kind)
            .await
    }
    .await;

    match result {
        Ok(results) => Json(json!({
            "ok": true,
            "count": results.len(),
            "results": results,
        }))
        .into_response(),
        Err(e @ AppError::NotConfigured { .. }) => {
            Json(json!({"ok": false, "error": e.to_string()})).into_response()
        }
        Err(e) => {
            tracing::warn!("Plex search for {q:?} failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"ok": false, "error": format!("Plex search failed: {e}")})),
            )
                .into_response()
        }
    }
}
