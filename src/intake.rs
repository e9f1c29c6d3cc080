//! HTTP intake for Evolution API webhooks.
//!
//! Inserts exactly one pending queue item per inbound-message event and
//! returns immediately; all processing happens in the worker.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::pipeline::extract::{MESSAGES_UPSERT, event_name, is_from_me};
use crate::store::Database;

/// Shared state for intake routes.
#[derive(Clone)]
pub struct IntakeState {
    pub db: Arc<dyn Database>,
}

/// Whether an event should become a queue item.
pub fn is_of_interest(event: &Value) -> bool {
    event_name(event) == Some(MESSAGES_UPSERT) && !is_from_me(event)
}

/// GET /
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "whatsapp-relay" }))
}

/// POST /webhook/evolution
///
/// Accepts one event object or an array of them. The events of interest in
/// one request are enqueued together, so a failed request stored nothing and
/// is safe for the sender to redeliver.
async fn evolution_webhook(
    State(state): State<IntakeState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let events = match body {
        Value::Array(events) => events,
        event => vec![event],
    };
    let received = events.len();
    let wanted: Vec<Value> = events.into_iter().filter(is_of_interest).collect();

    match state.db.enqueue_batch(&wanted).await {
        Ok(ids) => {
            if !ids.is_empty() {
                debug!(?ids, "Webhook events enqueued");
                info!(enqueued = ids.len(), received, "Webhook received");
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "received", "enqueued": ids.len() })),
            )
        }
        Err(e) => {
            error!(error = %e, events = wanted.len(), "Failed to enqueue webhook events");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "enqueued": 0 })),
            )
        }
    }
}

/// Build the intake routes.
pub fn intake_routes(state: IntakeState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook/evolution", post(evolution_webhook))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
