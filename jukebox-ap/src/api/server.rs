//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::playback::{PlaybackController, SettingsStore};
use crate::registry::TagRegistry;
use crate::sink::SinkManager;
use crate::state::SharedState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{handlers, sse};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub registry: Arc<TagRegistry>,
    pub sink: SinkManager,
    pub controller: PlaybackController,
    pub settings: Arc<SettingsStore>,
    /// Relative media paths are resolved against this directory
    pub music_dir: PathBuf,
}

impl AppContext {
    pub(crate) fn resolve_media(&self, media_path: PathBuf) -> PathBuf {
        if media_path.is_relative() {
            self.music_dir.join(media_path)
        } else {
            media_path
        }
    }
}

/// Build the router with all routes attached
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))

        // Tag registry
        .route("/tags", get(handlers::list_tags))
        .route("/tags/scan", post(handlers::scan_tag))
        .route(
            "/tags/:uid",
            put(handlers::register_tag).delete(handlers::unregister_tag),
        )

        // Playback control
        .route("/playback/play", post(handlers::play))
        .route("/playback/stop", post(handlers::stop))
        .route("/tracks", get(handlers::list_tracks))
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )

        // Sink management
        .route("/sink", get(handlers::link_state))
        .route("/sink/scan", post(handlers::scan_sinks))
        .route("/sink/preferred", axum::routing::delete(handlers::clear_preferred))
        .route("/sink/preferred/:mac", put(handlers::set_preferred))
        .route("/sink/:mac/pair", post(handlers::pair))
        .route("/sink/:mac/connect", post(handlers::connect))
        .route("/sink/:mac/disconnect", post(handlers::disconnect))
        .route("/sink/:mac/trust", post(handlers::trust))
        .route("/sink/:mac/remove", post(handlers::remove))
        .route("/sink/:mac/info", get(handlers::device_info))
        .route(
            "/sink/:mac/auto-connect",
            put(handlers::enable_auto_connect).delete(handlers::disable_auto_connect),
        )

        // SSE event stream
        .route("/events", get(sse::event_stream))

        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // LAN management UI
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(
    port: u16,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
