use axum::{extract::State, response::IntoResponse, routing::post, Router};
use std::sync::Arc;

use crate::{
    auth::AuthUser, errors::ServiceError, handlers::common::success_response,
    services::commerce::CheckoutResponse, AppState,
};

pub fn payment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
}

// POST /api/v1/payments/checkout
#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout",
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Empty cart, mixed plans or price mismatch", body = crate::errors::ErrorResponse),
        (status = 404, description = "User or cart not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.checkout.checkout(user.user_id).await?;
    Ok(success_response(response))
}
