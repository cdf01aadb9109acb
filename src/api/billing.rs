//! Payment webhook endpoint.
//!
//! The gateway signs the raw request body with HMAC-SHA256; nothing in
//! the payload is trusted until the signature verifies. Replayed order
//! ids are acknowledged without re-crediting.

use crate::api::AppError;
use crate::billing::{verify_signature, BillingStore, PaymentOutcome};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state for the billing API
#[derive(Clone)]
pub struct BillingAppState {
    pub billing: Arc<BillingStore>,
    pub webhook_secret: String,
}

/// Verified payment notification payload
#[derive(Deserialize)]
struct PaymentNotification {
    order_id: String,
    user_id: String,
    credits: i64,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// Create the billing webhook router
pub fn create_billing_router(state: BillingAppState) -> Router {
    Router::new()
        .route("/api/billing/webhook", post(payment_webhook))
        .with_state(Arc::new(state))
}

/// POST /api/billing/webhook
async fn payment_webhook(
    State(state): State<Arc<BillingAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing signature".to_string()))?;

    if !verify_signature(&state.webhook_secret, &body, signature) {
        // Log a prefix only; never the full signature or secret
        let prefix: String = signature.chars().take(8).collect();
        warn!(signature_prefix = %prefix, "Rejected webhook with invalid signature");
        return Err(AppError::Unauthorized("Invalid signature".to_string()));
    }

    let notification: PaymentNotification = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Malformed payment payload".to_string()))?;

    if notification.credits <= 0 {
        return Err(AppError::BadRequest(
            "Credits must be positive".to_string(),
        ));
    }

    let outcome = state
        .billing
        .record_payment(
            &notification.order_id,
            &notification.user_id,
            notification.credits,
        )
        .map_err(|e| {
            warn!(error = %e, "Failed to record payment");
            AppError::InternalServerError("Failed to record payment".to_string())
        })?;

    let status = match outcome {
        PaymentOutcome::Applied => {
            info!(order = %notification.order_id, "Payment credited");
            "applied"
        }
        PaymentOutcome::Replay => {
            info!(order = %notification.order_id, "Payment replay ignored");
            "replay"
        }
    };

    Ok(Json(WebhookResponse { status }))
}
