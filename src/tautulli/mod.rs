mod aggregator;
mod client;
mod envelope;
mod report;
mod row;

pub use aggregator::{
    AggregationWindow, Diagnostics, HistoryAggregator, PageFetcher, PlayGroup, StopReason,
    SummaryResult, SummaryStatus, Totals,
};
pub use client::{ActivityInfo, ServerInfo, TautulliClient};
pub(crate) use client::{excerpt, normalize_base_url};
pub use envelope::extract_rows;
pub use report::{SummaryReport, build_report};
pub use row::{HistoryRow, MediaCategory, UnitThresholds};
