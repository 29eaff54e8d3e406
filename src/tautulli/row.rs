use crate::config::AggregationConfig;
use serde_json::Value;

// Candidate fields per logical value, in priority order. Tautulli rows differ
// by media type, grouping mode and server version.
const TIMESTAMP_FIELDS: &[&str] = &["date", "started", "last_played", "created_at"];
const DURATION_FIELDS: &[&str] = &[
    "play_duration",
    "watched_duration",
    "viewed_time",
    "watch_time",
    "view_offset",
    "duration",
];
const TYPE_FIELDS: &[&str] = &["media_type", "type"];
const GROUP_FIELDS: &[&str] = &["group_key", "group_id", "group_ids", "session_id"];
const REFERENCE_FIELDS: &[&str] = &["reference_id"];
const ROW_ID_FIELDS: &[&str] = &["row_id", "id"];

/// Thresholds above which raw values are treated as milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitThresholds {
    pub ms_timestamp: i64,
    pub ms_duration: u64,
}

impl Default for UnitThresholds {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

impl From<&AggregationConfig> for UnitThresholds {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            ms_timestamp: config.ms_timestamp_threshold,
            ms_duration: config.ms_duration_threshold,
        }
    }
}

/// Media category used for the typed totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Movie,
    Episode,
    Other,
}

impl MediaCategory {
    pub fn classify(media_type: &str) -> Self {
        let media_type = media_type.to_lowercase();
        if media_type.contains("movie") {
            Self::Movie
        } else if media_type.contains("episode") || media_type.contains("show") || media_type == "tv"
        {
            Self::Episode
        } else {
            Self::Other
        }
    }
}

/// One history row after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    /// Grouping key, `None` when the row has no usable identity
    pub key: Option<String>,

    /// Event time in epoch seconds
    pub timestamp: Option<i64>,

    /// Lower-cased media type, empty when unknown
    pub media_type: String,

    /// Watched time in seconds
    pub duration: u64,
}

impl HistoryRow {
    pub fn from_value(row: &Value, thresholds: UnitThresholds) -> Self {
        let timestamp = first_number(row, TIMESTAMP_FIELDS, |n| n > 0.0)
            .and_then(|raw| normalize_timestamp(raw, thresholds.ms_timestamp));

        let duration = first_number(row, DURATION_FIELDS, |n| n > 0.0)
            .map_or(0, |raw| normalize_duration(raw, thresholds.ms_duration));

        let media_type = first_text(row, TYPE_FIELDS)
            .map(|t| t.to_lowercase())
            .unwrap_or_default();

        Self {
            key: grouping_key(row),
            timestamp,
            media_type,
            duration,
        }
    }
}

/// Parse a JSON number or numeric string
pub fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Non-empty string or number rendered as text
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_number(row: &Value, fields: &[&str], accept: impl Fn(f64) -> bool) -> Option<f64> {
    fields
        .iter()
        .filter_map(|field| row.get(field).and_then(number))
        .find(|n| accept(*n))
}

fn first_text(row: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| row.get(field).and_then(text))
}

/// Millisecond timestamps are truncated to the second they fall in
pub fn normalize_timestamp(raw: f64, ms_threshold: i64) -> Option<i64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }

    let seconds = if raw >= ms_threshold as f64 {
        raw / 1000.0
    } else {
        raw
    };
    Some(seconds.floor() as i64)
}

/// Durations above the threshold are milliseconds; both are rounded to whole seconds
pub fn normalize_duration(raw: f64, ms_threshold: u64) -> u64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }

    let seconds = if raw > ms_threshold as f64 {
        raw / 1000.0
    } else {
        raw
    };
    seconds.round() as u64
}

/// Group identifier, then reference identifier, then row identifier.
///
/// Keys are namespaced so a group id never collides with an unrelated row id.
pub fn grouping_key(row: &Value) -> Option<String> {
    [
        ("group", GROUP_FIELDS),
        ("ref", REFERENCE_FIELDS),
        ("row", ROW_ID_FIELDS),
    ]
    .iter()
    .find_map(|(namespace, fields)| first_text(row, fields).map(|id| format!("{namespace}:{id}")))
}
