use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Uniform error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "DIFFERENT_PLANS",
    "message": "Cart cannot mix monthly and yearly plans",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "DIFFERENT_PLANS")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Coarse error taxonomy shared by every [`ServiceError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    UpstreamFailure,
    Unauthorized,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("No cart found for user {0}")]
    CartNotFound(Uuid),

    #[error("Order for session {0} not found")]
    OrderNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid plan '{0}', expected one of: monthly, yearly, free-trial")]
    InvalidPlan(String),

    #[error("Cart cannot mix different plans")]
    DifferentPlans,

    #[error("Product {product_id} has no price for plan {plan}")]
    PriceMismatch { product_id: Uuid, plan: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Product {0} is already in the cart")]
    ItemExists(Uuid),

    #[error("User already holds an active subscription for product {0}")]
    AlreadySubscribed(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    ExternalServiceError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Taxonomy bucket used for logging and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::ProductNotFound(_)
            | Self::CartNotFound(_)
            | Self::OrderNotFound(_)
            | Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidPlan(_)
            | Self::DifferentPlans
            | Self::PriceMismatch { .. }
            | Self::EmptyCart
            | Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::InvalidSignature => ErrorKind::Validation,
            Self::ItemExists(_) | Self::AlreadySubscribed(_) | Self::Conflict(_) => {
                ErrorKind::Conflict
            }
            Self::ExternalServiceError(_) => ErrorKind::UpstreamFailure,
            Self::Unauthorized(_) | Self::Forbidden(_) => ErrorKind::Unauthorized,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            // Cart conflicts are reported as plain 400s on the public surface.
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
                ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Machine-readable code rendered in [`ErrorResponse::code`].
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::CartNotFound(_) => "CART_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidPlan(_) => "INVALID_PLAN",
            Self::DifferentPlans => "DIFFERENT_PLANS",
            Self::PriceMismatch { .. } => "PRICE_MISMATCH",
            Self::EmptyCart => "EMPTY_CART",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ItemExists(_) => "ITEM_EXISTS",
            Self::AlreadySubscribed(_) => "ALREADY_SUBSCRIBED",
            Self::Conflict(_) => "CONFLICT",
            Self::ExternalServiceError(_) => "UPSTREAM_FAILURE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InternalError(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment provider request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.kind() == ErrorKind::Internal || self.kind() == ErrorKind::UpstreamFailure {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};

    #[tokio::test]
    async fn service_error_response_includes_request_id_and_code() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::CartNotFound(Uuid::nil()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "CART_NOT_FOUND");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::ProductNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidPlan("weekly".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::DifferentPlans.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ItemExists(Uuid::nil()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::AlreadySubscribed(Uuid::nil()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn taxonomy_groups_domain_errors() {
        assert_eq!(ServiceError::OrderNotFound("s".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ServiceError::PriceMismatch {
                product_id: Uuid::nil(),
                plan: "yearly".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(ServiceError::ItemExists(Uuid::nil()).kind(), ErrorKind::Conflict);
        assert_eq!(
            ServiceError::ExternalServiceError("down".into()).kind(),
            ErrorKind::UpstreamFailure
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("update returned no rows".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("secret dsn".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::ExternalServiceError("sk_live_leak".into()).response_message(),
            "Payment provider request failed"
        );
        assert_eq!(
            ServiceError::DifferentPlans.response_message(),
            "Cart cannot mix different plans"
        );
    }
}
