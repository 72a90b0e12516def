//! Webhook endpoint — Telegram pushes updates to `POST /webhook`.
//!
//! Accepted updates are forwarded into the same stream the poll loop feeds,
//! so the intake loop handles both modes identically and sequentially. When a
//! secret is configured, deliveries must carry it in the
//! `X-Telegram-Bot-Api-Secret-Token` header.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::channels::telegram_types::Update;
use crate::channels::{UpdateStream, update_stream};

/// Path Telegram is configured to deliver updates to.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Body returned for every accepted delivery.
pub const WEBHOOK_ACK: &str = "OK";

/// Header Telegram fills with the `secret_token` given to `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct WebhookState {
    tx: mpsc::UnboundedSender<Update>,
    secret: Option<SecretString>,
}

impl WebhookState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .is_some_and(|value| value.as_bytes() == secret.expose_secret().as_bytes())
    }
}

/// Build the webhook router and the stream of updates it receives.
///
/// With `secret` set, deliveries without the matching secret header are
/// answered 401 and never reach the stream.
pub fn webhook_routes(secret: Option<SecretString>) -> (Router, UpdateStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new()
        .route(WEBHOOK_PATH, post(receive_update))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(WebhookState { tx, secret });
    (router, update_stream(rx))
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        warn!(update_id = update.update_id, "Webhook delivery without a valid secret token");
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    }
    debug!(update_id = update.update_id, "Webhook update received");
    if state.tx.send(update).is_err() {
        warn!("Update stream closed; dropping webhook delivery");
        return (StatusCode::SERVICE_UNAVAILABLE, "closed");
    }
    (StatusCode::OK, WEBHOOK_ACK)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "jv-report"
    }))
}
