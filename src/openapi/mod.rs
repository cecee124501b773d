use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Billing API",
        version = "1.0.0",
        description = r#"
# Storefront Billing API

Carts, subscription checkout and payment reconciliation for a storefront.

## Flow

1. `POST /api/v1/cart/add` collects products under a single plan (`monthly`, `yearly` or `free-trial`).
2. `POST /api/v1/payments/checkout` opens a pending order and returns the payment provider's hosted page.
3. The provider reports the outcome to `POST /api/v1/payments/webhook`; the order becomes `paid` or `cancelled`.

## Authentication

Cart, checkout and order endpoints require a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by the provider's `Stripe-Signature` header instead.

## Error Handling

Every error uses the same body:

```json
{
  "error": "Bad Request",
  "code": "DIFFERENT_PLANS",
  "message": "Cart cannot mix different plans",
  "request_id": "req-abc123",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Per-user cart"),
        (name = "Payments", description = "Checkout and provider webhooks"),
        (name = "Orders", description = "Order ledger"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::validate_cart,
        crate::handlers::carts::reset_cart,
        crate::handlers::carts::remove_cart_item,

        // Payments
        crate::handlers::payments::checkout,
        crate::handlers::payment_webhooks::payment_webhook,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            // Cart types
            crate::services::commerce::AddToCartInput,
            crate::services::commerce::CartView,
            crate::services::commerce::CartLine,
            crate::services::commerce::PricedCart,
            crate::services::commerce::PricedLine,
            crate::entities::commerce::Plan,
            crate::entities::commerce::CartStatus,

            // Checkout
            crate::services::commerce::CheckoutResponse,

            // Order types
            crate::services::orders::OrderSummary,
            crate::services::orders::OrderDetails,
            crate::services::orders::OrderLineView,
            crate::services::orders::OrderPage,
            crate::entities::OrderStatus,
            crate::repositories::OrderSortField,
            crate::repositories::SortDirection,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_storefront_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront Billing API"));
        assert!(json.contains("/api/v1/cart/add"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("bearer_auth"));
    }
}
