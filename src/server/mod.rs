//! HTTP surface over the shared inference state.
//!
//! - GET  /ws/gesture  - gesture feed, one JSON text message per tick
//! - GET  /video_feed  - annotated frames as `multipart/x-mixed-replace`
//! - GET  /api/status  - producer liveness and counters
//! - POST /api/reset   - clear the sequence window and prediction history

mod feed;
mod media;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crossbeam_channel::Sender;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::pipeline::{Command, SharedInferenceState, StatusReport};

pub use feed::gesture_updates;
pub use media::{BOUNDARY, MJPEG_CONTENT_TYPE, mjpeg_parts, multipart_part};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub gesture_interval: Duration,
    pub media_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            gesture_interval: Duration::from_millis(200),
            media_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub state: SharedInferenceState,
    pub commands: Sender<Command>,
    pub feed: FeedConfig,
    /// Cancelling it ends every client loop and the server itself.
    pub shutdown: CancellationToken,
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/ws/gesture", get(feed::gesture_socket))
        .route("/video_feed", get(media::video_feed))
        .route("/api/status", get(status))
        .route("/api/reset", post(reset))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

/// Serves until the shutdown token is cancelled.
pub async fn serve(listener: TcpListener, app: AppState) -> Result<()> {
    let shutdown = app.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        log::info!("serving on http://{addr}");
        log::info!("  - GET  /ws/gesture  gesture feed (WebSocket)");
        log::info!("  - GET  /video_feed  annotated frames (MJPEG)");
        log::info!("  - GET  /api/status  producer status");
        log::info!("  - POST /api/reset   clear the sequence window");
    }

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")?;
    log::info!("http server stopped");
    Ok(())
}

async fn status(State(app): State<AppState>) -> impl IntoResponse {
    Json(StatusReport::from(&app.state.current()))
}

async fn reset(State(app): State<AppState>) -> impl IntoResponse {
    match app.commands.send(Command::Reset) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            log::warn!("reset requested but the inference loop is gone");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
