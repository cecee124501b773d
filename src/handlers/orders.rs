use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::OrderStatus,
    errors::ServiceError,
    handlers::common::{page_size, success_response},
    repositories::{OrderSearch, OrderSortField, SortDirection},
    services::orders::{OrderDetails, OrderPage},
    AppState,
};

pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

/// Query parameters for `GET /orders`
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    /// Only orders of this user (admins only; others always see their own)
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub session_id: Option<String>,
    /// 1-based page number
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub sort_by: Option<OrderSortField>,
    /// Sort direction, `asc` or `desc`
    pub order: Option<SortDirection>,
}

impl OrderListQuery {
    fn into_search(self, caller: &AuthUser, default_size: u64, max_size: u64) -> Result<OrderSearch, ServiceError> {
        let user_id = if caller.is_admin() {
            self.user_id
        } else {
            match self.user_id {
                Some(requested) if requested != caller.user_id => {
                    return Err(ServiceError::Forbidden(
                        "cannot list orders of another user".to_string(),
                    ));
                }
                _ => Some(caller.user_id),
            }
        };

        Ok(OrderSearch {
            user_id,
            status: self.status,
            session_id: self.session_id.filter(|s| !s.trim().is_empty()),
            page: self.page.unwrap_or(1).max(1),
            per_page: page_size(self.per_page, default_size, max_size),
            sort_by: self.sort_by.unwrap_or_default(),
            direction: self.order.unwrap_or_default(),
        })
    }
}

// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Page of orders", body = OrderPage),
        (status = 403, description = "Listing another user's orders", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let search = query.into_search(
        &user,
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    )?;
    let page = state.services.orders.search(search).await?;
    Ok(success_response(page))
}

// GET /api/v1/orders/:id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with current line prices", body = OrderDetails),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = (!user.is_admin()).then_some(user.user_id);
    let details = state.services.orders.get_order_details(id, owner).await?;
    Ok(success_response(details))
}
