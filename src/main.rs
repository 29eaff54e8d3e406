use anyhow::Context;
use clap::Parser;
use plexletter::{
    AppState, Cli, Commands, ConfigStore, PROBE_TIMEOUT, ProbeOutcome, Service, TautulliClient,
    build_report, listen_addr, probe_plex, probe_smtp, probe_tautulli,
};
use std::path::Path;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "plexletter=info,tower_http=info";

fn init_logging(json_logs: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output
    if json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let result = match cli.command {
        Commands::Serve { config, listen } => run_serve(&config, listen.as_deref()).await,
        Commands::Summary { config, days } => run_summary(&config, days).await,
        Commands::Check { config } => run_check(&config).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            tracing::error!("Error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run_serve(config_path: &Path, listen: Option<&str>) -> anyhow::Result<bool> {
    let port_env = std::env::var("PORT").ok();
    let addr = listen_addr(listen, port_env.as_deref())?;

    tracing::info!("Loading configuration from: {}", config_path.display());
    let store = ConfigStore::load(config_path);

    plexletter::serve(addr, AppState::new(store))
        .await
        .with_context(|| format!("HTTP server on {addr} failed"))?;
    Ok(true)
}

async fn run_summary(config_path: &Path, days: Option<u32>) -> anyhow::Result<bool> {
    let store = ConfigStore::load(config_path);
    let settings = store.settings();
    let days = days
        .filter(|d| *d >= 1)
        .unwrap_or(settings.aggregation.default_days);

    let report = build_report(&settings.tautulli_config(), &settings.aggregation, days).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render summary")?
    );

    if let Some(debug_info) = report.debug.as_ref().filter(|_| report.ok) {
        tracing::info!(
            "Status {:?}, stopped on {:?} after {} pages",
            debug_info.status,
            debug_info.stop_reason,
            debug_info.pages
        );
    }
    Ok(report.ok)
}

fn print_outcome(name: &str, outcome: &ProbeOutcome) {
    match (&outcome.error, outcome.stream_count) {
        (Some(error), _) => println!("  {name:<9} FAIL  {error}"),
        (None, Some(streams)) => println!("  {name:<9} ok    ({streams} active streams)"),
        (None, None) => println!("  {name:<9} ok"),
    }
}

async fn run_check(config_path: &Path) -> anyhow::Result<bool> {
    let mut store = ConfigStore::load(config_path);
    let settings = store.settings().clone();
    let tautulli = settings.tautulli_config();
    let smtp_settings = settings.smtp_settings();

    let (plex, tautulli_outcome, smtp) = tokio::join!(
        probe_plex(&settings.plex_url, &settings.plex_token),
        probe_tautulli(&tautulli),
        probe_smtp(&smtp_settings, None)
    );

    println!("Connection check ({}):", config_path.display());
    print_outcome("Plex", &plex);
    print_outcome("Tautulli", &tautulli_outcome);
    print_outcome("SMTP", &smtp);

    if tautulli_outcome.ok {
        match TautulliClient::new(&tautulli, PROBE_TIMEOUT)?
            .get_server_info()
            .await
        {
            Ok(info) => println!("  Tautulli is watching {} ({})", info.pms_name, info.pms_version),
            Err(e) => tracing::debug!("Server info unavailable: {e}"),
        }
    }

    for (service, outcome) in [
        (Service::Plex, &plex),
        (Service::Tautulli, &tautulli_outcome),
        (Service::Smtp, &smtp),
    ] {
        if let Err(e) = store.record_test(service, outcome.ok) {
            tracing::warn!("Could not record {service:?} result: {e}");
        }
    }

    Ok(plex.ok && tautulli_outcome.ok && smtp.ok)
}
