//! HTTP boundary over [`BalloonEngine`].
//!
//! | Method & path | Handler |
//! |---------------|---------|
//! | `POST /upload?session_id=&force_fresh=` | [`handlers::upload`] |
//! | `POST /probe` | [`handlers::probe`] |
//! | `POST /resume?session_id=` | [`handlers::resume`] |
//! | `GET /jobs/{job_id}` | [`handlers::job_status`] |
//! | `POST` or `GET /jobs/{job_id}/cancel?session_id=` | [`handlers::cancel_job`] |
//! | `GET /progress/{hash}` | [`handlers::progress`] |
//! | `DELETE /progress/{hash}` | [`handlers::clear_progress`] |
//! | `GET /drawings/{hash}` | [`handlers::drawing`] |
//! | `GET /results/{hash}` | [`handlers::results`] |
//! | `GET /results/{hash}/pages` | [`handlers::page_list`] |
//! | `GET /results/{hash}/pages/{page}` | [`handlers::page_image`] |
//! | `GET /results/{hash}/find/{find_number}` | [`handlers::find`] |
//! | `GET /sessions/{session_id}` | [`handlers::session_job`] |
//! | `GET /health` | [`handlers::health`] |
//!
//! Upload bodies are the raw PDF bytes. Errors are JSON
//! `{"error": {"code", "message"}}`.

pub mod error;
pub mod handlers;

use crate::engine::BalloonEngine;
use crate::error::BalloonError;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// Headroom so a slightly oversize body reaches the engine and gets its error.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: BalloonEngine,
}

pub fn router(engine: BalloonEngine) -> Router {
    let body_limit = engine.config().max_upload_bytes.saturating_add(BODY_LIMIT_SLACK);
    let state = AppState { engine };

    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/probe", post(handlers::probe))
        .route("/resume", post(handlers::resume))
        .route("/jobs/{job_id}", get(handlers::job_status))
        .route(
            "/jobs/{job_id}/cancel",
            post(handlers::cancel_job).get(handlers::cancel_job),
        )
        .route(
            "/progress/{hash}",
            get(handlers::progress).delete(handlers::clear_progress),
        )
        .route("/drawings/{hash}", get(handlers::drawing))
        .route("/results/{hash}", get(handlers::results))
        .route("/results/{hash}/pages", get(handlers::page_list))
        .route("/results/{hash}/pages/{page}", get(handlers::page_image))
        .route("/results/{hash}/find/{find_number}", get(handlers::find))
        .route("/sessions/{session_id}", get(handlers::session_job))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` fires. The job reaper runs for the same lifetime.
pub async fn serve(
    engine: BalloonEngine,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), BalloonError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BalloonError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, data_dir = %engine.config().data_dir.display(), "Listening");

    let reaper = engine.spawn_reaper(shutdown.clone());
    let app = router(engine);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown({
            let token = shutdown.clone();
            async move { token.cancelled().await }
        })
        .await
        .map_err(|e| BalloonError::Internal(format!("server error: {e}")));

    shutdown.cancel();
    let _ = reaper.await;
    info!("Server stopped");
    result
}
