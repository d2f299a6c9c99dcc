//! Ephemeral-blob HTTP server (§6 "optional ephemeral-blob HTTP server"):
//! an alternative fetch path for large configs handed off through the
//! [`EphemeralStore`] by `Driver::configure`, for switches whose `copy`
//! command can target `http://` as well as `tftp://`. Gated by
//! `serve_http`/`http_port` in configuration; the Bootstrap File Server's
//! `adopt/<token>` filename handling covers the TFTP path regardless.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::domain::ephemeral::EphemeralStore;

async fn fetch_blob(State(store): State<Arc<EphemeralStore>>, Path(token): Path<String>) -> Result<String, StatusCode> {
    store.get(&token).await.ok_or(StatusCode::NOT_FOUND)
}

pub fn router(store: Arc<EphemeralStore>) -> Router {
    Router::new().route("/adopt/:token", get(fetch_blob)).with_state(store)
}

/// Bind and serve until the process exits.
pub async fn serve(store: Arc<EphemeralStore>, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, "ephemeral blob http server listening");
    axum::serve(listener, router(store)).await
}
