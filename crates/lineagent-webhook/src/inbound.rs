//! Inbound webhook handling
//!
//! The handler verifies the signature over the raw body, queues every
//! actionable message and answers right away. Nothing downstream is awaited.

use crate::{
    bridge::{BridgeQueue, BridgeState},
    events::{extract_messages, ExtractOptions},
    signature::{SignatureVerifier, SIGNATURE_HEADER},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Raw webhook delivery as received
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub body: Bytes,
    /// Value of `X-Line-Signature`, if sent
    pub signature: Option<String>,
    pub content_type: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn from_request(headers: &HeaderMap, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            body,
            signature: header(SIGNATURE_HEADER),
            content_type: header("content-type"),
            received_at: Utc::now(),
        }
    }
}

/// Shared state for webhook routes
pub struct WebhookState {
    verifier: SignatureVerifier,
    queue: BridgeQueue,
    options: ExtractOptions,
}

impl WebhookState {
    pub fn new(verifier: SignatureVerifier, queue: BridgeQueue, options: ExtractOptions) -> Self {
        Self {
            verifier,
            queue,
            options,
        }
    }

    /// Verify a delivery and queue its messages.
    ///
    /// Ends in `Rejected` when the signature check fails and `Acknowledged`
    /// otherwise, including for payloads that cannot be parsed.
    pub fn accept(&self, event: &InboundEvent) -> BridgeState {
        record(event, BridgeState::Received);

        if let Err(e) = self.verifier.check(&event.body, event.signature.as_deref()) {
            warn!(
                error = %e,
                body_len = event.body.len(),
                "Webhook signature verification failed"
            );
            record(event, BridgeState::Rejected);
            return BridgeState::Rejected;
        }
        record(event, BridgeState::Verified);

        // A verified delivery is always acknowledged; payload problems are ours to log
        match extract_messages(&event.body, &self.options) {
            Ok(messages) => {
                debug!(count = messages.len(), "Accepted webhook delivery");
                for message in messages {
                    let event_id = message.log_id().to_string();
                    if message.is_redelivery {
                        info!(event_id = %event_id, "Processing redelivered event");
                    }
                    if let Err(e) = self.queue.submit(message) {
                        error!(event_id = %event_id, error = %e, "Failed to queue message");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Ignoring malformed webhook payload");
            }
        }

        record(event, BridgeState::Acknowledged);
        BridgeState::Acknowledged
    }
}

fn record(event: &InboundEvent, state: BridgeState) {
    debug!(
        received_at = %event.received_at,
        state = ?state,
        terminal = state.is_terminal(),
        "Delivery state changed"
    );
}

/// Create Axum router for the LINE webhook
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .with_state(state)
}

/// Handle incoming webhook request
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event = InboundEvent::from_request(&headers, body);

    match state.accept(&event) {
        BridgeState::Rejected => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "message": "Invalid signature"})),
        ),
        _ => (StatusCode::OK, Json(json!({"status": "ok"}))),
    }
}
