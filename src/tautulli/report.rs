use super::aggregator::{Diagnostics, HistoryAggregator, SummaryResult, Totals};
use super::client::TautulliClient;
use crate::config::{AggregationConfig, TautulliConfig};
use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Summary payload served to the newsletter page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub totals: Totals,
    pub debug: Option<Diagnostics>,
    pub home: Option<Value>,
}

impl SummaryReport {
    /// No aggregation was attempted
    pub fn unavailable(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            totals: Totals::default(),
            debug: None,
            home: None,
        }
    }

    /// Combine an aggregation run with the (optional) home statistics
    pub fn from_parts(result: SummaryResult, home: Result<Value>) -> Self {
        let home = home
            .inspect_err(|e| tracing::warn!("Home stats unavailable: {e}"))
            .ok();

        if result.is_failed() {
            let reason = result
                .diagnostics
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            return Self {
                ok: false,
                error: Some(format!("fetch failed: {reason}")),
                totals: Totals::default(),
                debug: Some(result.diagnostics),
                home,
            };
        }

        Self {
            ok: true,
            error: None,
            totals: result.totals,
            debug: Some(result.diagnostics),
            home,
        }
    }
}

/// Run one summary against Tautulli, fetching home stats alongside the history
pub async fn build_report(
    tautulli: &TautulliConfig,
    aggregation: &AggregationConfig,
    days: u32,
) -> SummaryReport {
    let timeout = Duration::from_secs(aggregation.fetch_timeout_secs);
    let client = match TautulliClient::new(tautulli, timeout) {
        Ok(client) => client,
        Err(e) => {
            tracing::info!("Skipping summary: {e}");
            return SummaryReport::unavailable(e);
        }
    };

    let aggregator = HistoryAggregator::new(aggregation.clone());
    let (result, home) = tokio::join!(
        aggregator.summarize(days, &client),
        client.get_home_stats(days.max(1))
    );

    SummaryReport::from_parts(result, home)
}
