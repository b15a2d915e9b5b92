use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::sync::engine::SyncEngine;
use crate::sync::feed::RemoteFeed;
use crate::sync::store::FleetStore;

/// Routes for triggering a full reconciliation over HTTP.
pub fn router<F, S>(engine: Arc<SyncEngine<F, S>>) -> Router
where
    F: RemoteFeed,
    S: FleetStore,
{
    Router::new()
        .route("/api/sync", post(trigger_sync::<F, S>))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn trigger_sync<F, S>(State(engine): State<Arc<SyncEngine<F, S>>>) -> Response
where
    F: RemoteFeed,
    S: FleetStore,
{
    match engine.sync_all().await {
        Ok(reports) => {
            info!(kinds = reports.len(), "sync triggered over http finished");
            (
                StatusCode::OK,
                Json(json!({ "message": "sync completed", "reports": reports })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, kind = ?err.kind(), "sync triggered over http failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string(), "kind": err.kind() })),
            )
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}
