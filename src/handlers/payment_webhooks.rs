use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    errors::ServiceError,
    webhooks::{self, SIGNATURE_HEADER},
    AppState,
};

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event received", body = serde_json::Value, example = json!({"received": true})),
        (status = 400, description = "Malformed payload or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = &state.config.payment;
    if let Some(secret) = payment.webhook_secret() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = webhooks::verify_signature(
            signature,
            &body,
            secret,
            payment.webhook_tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!("Payment webhook signature verification failed");
            counter!("webhook_events_rejected_total", 1, "reason" => "signature");
            return Err(e);
        }
    }

    let envelope = webhooks::parse(&body).map_err(|e| {
        counter!("webhook_events_rejected_total", 1, "reason" => "malformed");
        e
    })?;

    let kind = envelope.event.kind().to_string();
    counter!("webhook_events_received_total", 1, "type" => kind.clone());

    // Per-event failures are acknowledged so the provider does not retry them.
    match state
        .services
        .reconciler
        .handle(envelope.event_id.as_deref(), envelope.event)
        .await
    {
        Ok(outcome) => {
            info!(event_id = ?envelope.event_id, event_type = %kind, ?outcome, "webhook event reconciled");
        }
        Err(e) => {
            counter!("webhook_events_failed_total", 1, "type" => kind.clone());
            error!(event_id = ?envelope.event_id, event_type = %kind, error = %e, "webhook event failed");
        }
    }

    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}
