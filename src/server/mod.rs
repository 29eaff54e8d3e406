mod routes;

use crate::config::{ConfigStore, Service, Settings};
use crate::error::Result;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared server state: the settings document and its file
#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<ConfigStore>>,
}

impl AppState {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Snapshot of the current settings; the lock is not held across network calls
    async fn settings(&self) -> Settings {
        self.store.lock().await.settings().clone()
    }

    async fn record_test(&self, service: Service, ok: bool) {
        if let Err(e) = self.store.lock().await.record_test(service, ok) {
            tracing::warn!("Failed to persist {service:?} test result: {e}");
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/config", get(routes::get_config).post(routes::post_config))
        .route("/api/status", get(routes::get_status))
        .route("/api/test/plex", post(routes::test_plex))
        .route("/api/test-plex", post(routes::test_plex))
        .route("/api/test/tautulli", post(routes::test_tautulli))
        .route("/api/test-tautulli", post(routes::test_tautulli))
        .route("/api/test-email", post(routes::test_email))
        .route("/api/test/smtp", post(routes::test_email))
        .route("/api/tautulli/summary", get(routes::tautulli_summary))
        .route("/tautulli/summary", get(routes::tautulli_summary))
        .route("/api/tautulli/home", get(routes::tautulli_home))
        .route("/tautulli/home", get(routes::tautulli_home))
        .route("/api/plex/status", get(routes::plex_status))
        .route("/api/plex/search", get(routes::plex_search))
        .route("/plex/search", get(routes::plex_search))
        .route("/send", post(routes::send_email))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until Ctrl-C
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
