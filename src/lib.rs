#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod config;
pub mod error;
pub mod probe;
pub mod server;
pub mod tautulli;

pub use cli::{Cli, Commands, DEFAULT_PORT, default_config_path, listen_addr};
pub use config::{
    AggregationConfig, ConfigError, ConfigStore, LastTest, Service, Settings, SettingsUpdate,
    StatusView, TautulliConfig, TestStatus,
};
pub use error::{AppError, Result};
pub use probe::{
    Delivery, Mailer, OutgoingEmail, PROBE_TIMEOUT, PlexClient, PlexIdentity, PlexItem, PlexKind,
    ProbeOutcome, SmtpSettings, probe_plex, probe_smtp, probe_tautulli,
};
pub use server::{AppState, router, serve};
pub use tautulli::{
    AggregationWindow, Diagnostics, HistoryAggregator, HistoryRow, MediaCategory, PageFetcher,
    PlayGroup, StopReason, SummaryReport, SummaryResult, SummaryStatus, TautulliClient, Totals,
    UnitThresholds, build_report, extract_rows,
};
