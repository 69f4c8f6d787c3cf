//! REST surface: webhook intake, queue push, reconcile trigger, health.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use tm_core::{SourceItem, SyncAction, SyncMessage, SyncSource};

use crate::auth::{verify_bearer, verify_webhook_signature};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-todoist-hmac-sha256";

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/todoist/webhook", post(webhook))
        .route("/queue/push", post(queue_push))
        .route("/reconcile", post(reconcile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn service_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "taskmirror",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "eligibility_tag": state.cfg.eligibility_tag,
    }))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_name: String,
    #[serde(default)]
    event_data: Value,
}

fn action_for_event(event_name: &str) -> Option<SyncAction> {
    match event_name {
        "item:added" | "item:updated" | "item:completed" | "item:uncompleted" | "note:added"
        | "note:updated" => Some(SyncAction::Upsert),
        "item:deleted" => Some(SyncAction::Archive),
        _ => None,
    }
}

/// Webhook intake: verify the HMAC over the raw body, translate the event
/// to a sync message, enqueue, and return without waiting for the worker.
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_webhook_signature(secret, &body, signature) {
            tracing::warn!("webhook signature verification failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "rejected", "reason": "invalid_signature"})),
            );
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "rejected", "reason": format!("malformed body: {e}")})),
            );
        }
    };

    let Some(action) = action_for_event(&event.event_name) else {
        tracing::debug!(event = %event.event_name, "ignoring irrelevant webhook event");
        return (
            StatusCode::OK,
            Json(json!({"status": "ignored", "reason": "irrelevant_event"})),
        );
    };

    let Some(item_id) = event
        .event_data
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        tracing::warn!(event = %event.event_name, "webhook event carries no item id");
        return (
            StatusCode::OK,
            Json(json!({"status": "ignored", "reason": "no_task_id"})),
        );
    };

    let mut message = match action {
        SyncAction::Upsert => SyncMessage::upsert(&item_id, SyncSource::Webhook),
        SyncAction::Archive => SyncMessage::archive(&item_id, SyncSource::Webhook),
    };
    // Item events carry the full item; keep it inline to spare a re-fetch.
    // Note events describe the comment, not the item, so those re-fetch.
    if event.event_name.starts_with("item:") {
        if let Ok(snapshot) = serde_json::from_value::<SourceItem>(event.event_data.clone()) {
            message = message.with_snapshot(snapshot);
        }
    }

    match state.queue.enqueue(&message).await {
        Ok(_) => {
            tracing::info!(item_id = %item_id, action = action.as_str(), "webhook enqueued");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "queued",
                    "task_id": item_id,
                    "action": action.as_str(),
                })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "webhook enqueue failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()})),
            )
        }
    }
}

/// Queue push: unwrap a bus-wrapped message (base64 `message.data`) or a
/// bare `SyncMessage` and enqueue it.
async fn queue_push(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let message: Result<SyncMessage, String> = match body
        .pointer("/message/data")
        .and_then(Value::as_str)
    {
        Some(data) => BASE64
            .decode(data)
            .map_err(|e| format!("bad base64: {e}"))
            .and_then(|raw| {
                serde_json::from_slice(&raw).map_err(|e| format!("bad message: {e}"))
            }),
        None => serde_json::from_value(body).map_err(|e| format!("bad message: {e}")),
    };

    match message {
        Ok(message) => match state.queue.enqueue(&message).await {
            Ok(id) => (
                StatusCode::OK,
                Json(json!({"status": "queued", "message_id": id.to_string()})),
            ),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()})),
            ),
        },
        Err(reason) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "rejected", "reason": reason})),
        ),
    }
}

/// Authenticated synchronous reconciliation pass.
async fn reconcile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = &state.reconcile_token {
        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !verify_bearer(token, header) {
            tracing::warn!("unauthorized reconcile attempt");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid authorization token"})),
            );
        }
    }

    match state.reconciler.run().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::to_value(summary).unwrap_or_else(|_| json!({}))),
        ),
        Err(e) => {
            tracing::error!(error = %e, "reconciliation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}
