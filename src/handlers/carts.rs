use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::commerce::{AddToCartInput, CartView, PricedCart},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/validate", post(validate_cart))
        .route("/reset", post(reset_cart))
        .route("/items/:product_id", delete(remove_cart_item))
}

/// Add a product to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/add",
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Item added", body = CartView),
        (status = 400, description = "Invalid plan, quantity, mixed plans, duplicate item or existing subscription", body = crate::errors::ErrorResponse),
        (status = 404, description = "User or product not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Subscription lookup failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let cart = state.services.cart.add_item(user.user_id, payload).await?;
    Ok(success_response(cart))
}

/// Priced view of the caller's cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart with current prices", body = PricedCart),
        (status = 400, description = "A line has no price for its plan", body = crate::errors::ErrorResponse),
        (status = 404, description = "No cart, or a product no longer exists", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart_prices(user.user_id).await?;
    Ok(success_response(cart))
}

/// Empty the cart after a completed checkout. Safe to repeat.
#[utoipa::path(
    post,
    path = "/api/v1/cart/validate",
    responses(
        (status = 200, description = "Cart emptied", body = CartView),
        (status = 404, description = "No cart", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn validate_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.validate(user.user_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/reset",
    responses(
        (status = 200, description = "Cart emptied", body = CartView),
        (status = 404, description = "No cart", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn reset_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.reset(user.user_id).await?;
    Ok(success_response(cart))
}

/// Remove item from cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product to remove")),
    responses(
        (status = 200, description = "Item removed (or was not present)", body = CartView),
        (status = 404, description = "No cart", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .delete_item(user.user_id, product_id)
        .await?;
    Ok(success_response(cart))
}
