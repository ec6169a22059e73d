//! services/bot/src/bot/webhook.rs
//!
//! Webhook intake: Telegram POSTs each update to `/telegram/webhook` with the
//! secret token it was registered with. `/health` answers liveness probes.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::bot::dispatcher::Dispatcher;
use crate::bot::protocol::{inbound_event, Update};

pub const WEBHOOK_PATH: &str = "/telegram/webhook";
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Dispatcher,
    pub secret: Arc<str>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_update))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accepts one update. Anything but a wrong secret is acknowledged with 200 so
/// Telegram does not redeliver it.
pub async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(&*state.secret) {
        warn!("Webhook call with a missing or wrong secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let update_id = update.update_id;
    match inbound_event(update) {
        Some(event) => state.dispatcher.dispatch(event),
        None => debug!(update_id, "Ignoring update"),
    }
    StatusCode::OK
}

async fn health() -> &'static str {
    "ok"
}
