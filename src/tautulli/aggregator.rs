use super::row::{HistoryRow, MediaCategory, UnitThresholds};
use crate::config::AggregationConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Source of history pages, newest first.
///
/// `after` is a pre-filter hint in epoch seconds; implementations may return
/// older rows and the aggregator re-checks every timestamp.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, after: i64, start: u32, length: u32) -> Result<Vec<Value>>;
}

/// Trailing window of `days` days ending now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWindow {
    pub days: u32,
    /// Inclusive lower bound, epoch seconds
    pub after: i64,
}

impl AggregationWindow {
    pub fn new(days: u32, now: i64) -> Self {
        let days = days.max(1);
        Self {
            days,
            after: now - i64::from(days) * SECONDS_PER_DAY,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.after
    }
}

/// One logical play, possibly assembled from several history rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayGroup {
    pub key: String,
    pub media_type: String,
    pub total_duration: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub movies: u64,
    pub episodes: u64,
    pub total_plays: u64,
    pub total_time_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    /// A later page failed; totals cover the pages fetched before it
    Partial,
    /// The first page failed; totals are zero
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An empty page was returned
    Exhausted,
    /// A page returned fewer rows than requested
    ShortPage,
    /// A page reached rows older than the window
    WindowPassed,
    /// The page budget ran out
    PageLimit,
    FetchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub days: u32,
    pub after: i64,
    pub pages: u32,
    pub scanned_rows: u64,
    pub counted_rows: u64,
    pub skipped_rows: u64,
    pub undated_rows: u64,
    pub groups: u64,
    pub min_ts_seen: Option<i64>,
    pub max_ts_seen: Option<i64>,
    pub status: SummaryStatus,
    pub stop_reason: StopReason,
    pub error: Option<String>,
}

impl Diagnostics {
    fn new(window: AggregationWindow) -> Self {
        Self {
            days: window.days,
            after: window.after,
            pages: 0,
            scanned_rows: 0,
            counted_rows: 0,
            skipped_rows: 0,
            undated_rows: 0,
            groups: 0,
            min_ts_seen: None,
            max_ts_seen: None,
            status: SummaryStatus::Complete,
            stop_reason: StopReason::PageLimit,
            error: None,
        }
    }

    fn observe(&mut self, timestamp: i64) {
        self.min_ts_seen = Some(self.min_ts_seen.map_or(timestamp, |m| m.min(timestamp)));
        self.max_ts_seen = Some(self.max_ts_seen.map_or(timestamp, |m| m.max(timestamp)));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryResult {
    pub totals: Totals,
    #[serde(rename = "debug")]
    pub diagnostics: Diagnostics,
}

impl SummaryResult {
    pub fn is_failed(&self) -> bool {
        self.diagnostics.status == SummaryStatus::Failed
    }

    pub fn is_partial(&self) -> bool {
        self.diagnostics.status == SummaryStatus::Partial
    }
}

/// Plays keyed by grouping key, local to one summary run
#[derive(Debug, Default)]
struct PlayTable {
    groups: HashMap<String, PlayGroup>,
}

impl PlayTable {
    fn fold(&mut self, row: HistoryRow, key: String) {
        let group = self.groups.entry(key).or_insert_with_key(|key| PlayGroup {
            key: key.clone(),
            media_type: String::new(),
            total_duration: 0,
        });

        if group.media_type.is_empty() {
            group.media_type = row.media_type;
        }
        group.total_duration = group.total_duration.saturating_add(row.duration);
    }

    fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for group in self.groups.values() {
            match MediaCategory::classify(&group.media_type) {
                MediaCategory::Movie => totals.movies += 1,
                MediaCategory::Episode => totals.episodes += 1,
                MediaCategory::Other => {}
            }
            totals.total_plays += 1;
            totals.total_time_seconds =
                totals.total_time_seconds.saturating_add(group.total_duration);
        }
        totals
    }
}

/// Pages through watch history and rolls it up into play totals
#[derive(Debug, Clone)]
pub struct HistoryAggregator {
    config: AggregationConfig,
}

impl HistoryAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Summarize the last `days` days (0 is treated as 1)
    pub async fn summarize<F>(&self, days: u32, fetcher: &F) -> SummaryResult
    where
        F: PageFetcher + ?Sized,
    {
        self.summarize_at(days, chrono::Utc::now().timestamp(), fetcher)
            .await
    }

    /// Summarize relative to an explicit `now` (epoch seconds)
    pub async fn summarize_at<F>(&self, days: u32, now: i64, fetcher: &F) -> SummaryResult
    where
        F: PageFetcher + ?Sized,
    {
        let window = AggregationWindow::new(days, now);
        let thresholds = UnitThresholds::from(&self.config);
        let length = self.config.page_length;
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);

        let mut table = PlayTable::default();
        let mut diag = Diagnostics::new(window);

        for page in 0..self.config.max_pages {
            let start = page.saturating_mul(length);
            let fetched =
                tokio::time::timeout(timeout, fetcher.fetch_page(window.after, start, length))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AppError::Timeout {
                            service: "Tautulli",
                            secs: self.config.fetch_timeout_secs,
                        })
                    });

            let rows = match fetched {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("History page {page} (start {start}) failed: {e}");
                    diag.stop_reason = StopReason::FetchFailed;
                    diag.error = Some(e.to_string());
                    diag.status = if diag.pages == 0 {
                        SummaryStatus::Failed
                    } else {
                        SummaryStatus::Partial
                    };
                    break;
                }
            };

            diag.pages += 1;
            if rows.is_empty() {
                diag.stop_reason = StopReason::Exhausted;
                break;
            }

            let mut page_min: Option<i64> = None;
            for raw in &rows {
                diag.scanned_rows += 1;
                let row = HistoryRow::from_value(raw, thresholds);

                let Some(timestamp) = row.timestamp else {
                    diag.undated_rows += 1;
                    continue;
                };
                diag.observe(timestamp);
                page_min = Some(page_min.map_or(timestamp, |m| m.min(timestamp)));

                if !window.contains(timestamp) {
                    continue;
                }

                match row.key.clone() {
                    Some(key) => {
                        table.fold(row, key);
                        diag.counted_rows += 1;
                    }
                    None => diag.skipped_rows += 1,
                }
            }

            tracing::debug!(
                "History page {page}: {} rows, oldest {:?}",
                rows.len(),
                page_min
            );

            if page_min.is_some_and(|min| min < window.after) {
                diag.stop_reason = StopReason::WindowPassed;
                break;
            }

            if rows.len() < length as usize {
                diag.stop_reason = StopReason::ShortPage;
                break;
            }
        }

        let totals = if diag.status == SummaryStatus::Failed {
            Totals::default()
        } else {
            table.totals()
        };
        diag.groups = table.groups.len() as u64;

        tracing::info!(
            "Summarized {} days: {} plays ({} movies, {} episodes) from {} rows over {} pages ({:?})",
            window.days,
            totals.total_plays,
            totals.movies,
            totals.episodes,
            diag.scanned_rows,
            diag.pages,
            diag.stop_reason
        );

        SummaryResult {
            totals,
            diagnostics: diag,
        }
    }
}
