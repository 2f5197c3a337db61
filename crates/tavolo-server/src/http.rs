//! HTTP surface for the push dispatch service.
//!
//! One operational endpoint (`POST /v1/notify`), invoked by the order
//! status updater whenever an order changes state, plus a health probe.
//! CORS is wide open: the caller may be the storefront admin UI served
//! from any origin, and the endpoint carries no browser credentials.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tavolo_push::{DispatchRequest, PushDispatcher, SqliteSubscriptionStore};
use tavolo_types::PushError;
use tracing::error;

/// The concrete dispatcher the service runs.
pub type Dispatcher = PushDispatcher<SqliteSubscriptionStore>;

/// JSON body of `POST /v1/notify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    custom_title: Option<String>,
    #[serde(default)]
    custom_body: Option<String>,
}

/// Build the service router.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/v1/notify", post(notify_handler).options(preflight_handler))
        .route("/v1/health", get(health_handler))
        .layer(axum::middleware::map_response(with_cors_headers))
        .with_state(dispatcher)
}

/// Append permissive CORS headers to every response.
async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, content-type"),
    );
    response
}

/// Empty 200 for CORS preflight.
async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn notify_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(req): Json<NotifyRequest>,
) -> Response {
    let order_id = match req.order_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "orderId is required"})),
            )
                .into_response()
        }
    };

    let request = DispatchRequest {
        order_id,
        status: req.status,
        custom_title: req.custom_title,
        custom_body: req.custom_body,
    };

    match dispatcher.dispatch(&request).await {
        Ok(outcome) if outcome.total == 0 => (
            StatusCode::OK,
            Json(json!({"success": true, "sent": 0, "message": "No subscriptions"})),
        )
            .into_response(),
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"success": true, "sent": outcome.sent, "total": outcome.total})),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Map call-level errors to HTTP statuses. Per-subscriber outcomes never
/// reach here; they are folded into the dispatch counters.
fn error_response(err: PushError) -> Response {
    error!("dispatch failed: {err}");
    let (status, message) = match &err {
        PushError::Input(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        PushError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    };
    (status, Json(json!({"error": message}))).into_response()
}
