use crate::{
    config::PaymentConfig,
    errors::ServiceError,
    repositories::{NewOrder, OrderRepository, UserCriteria, UserRepository},
    services::{
        commerce::cart_service::{single_plan, CartService},
        payments::{CheckoutLine, CheckoutSessionRequest, CustomerKey, PaymentProvider},
    },
    tracing::with_metrics,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Turns a user's cart into a pending order and a provider checkout session.
#[derive(Clone)]
pub struct CheckoutService {
    users: UserRepository,
    orders: OrderRepository,
    carts: CartService,
    provider: Arc<dyn PaymentProvider>,
    payment: PaymentConfig,
}

impl CheckoutService {
    pub fn new(
        users: UserRepository,
        orders: OrderRepository,
        carts: CartService,
        provider: Arc<dyn PaymentProvider>,
        payment: PaymentConfig,
    ) -> Self {
        Self {
            users,
            orders,
            carts,
            provider,
            payment,
        }
    }

    /// Starts a checkout for the user's cart and returns the provider redirect.
    ///
    /// Everything up to the order insert is validation and leaves no trace
    /// except the user's outstanding session. Once the order exists it stays
    /// `pending` even if the provider call fails; the stale-order sweep or a
    /// later webhook resolves it.
    #[instrument(skip(self))]
    pub async fn checkout(&self, user_id: Uuid) -> Result<CheckoutResponse, ServiceError> {
        let user = self.users.get_by(&UserCriteria::Id(user_id)).await?;
        let (cart, items) = self.carts.load_for_checkout(user_id).await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let priced = self.carts.price_lines(&items).await?;
        single_plan(&items)?;

        let lines = priced
            .iter()
            .map(|line| {
                let quantity = u32::try_from(line.quantity).map_err(|_| {
                    ServiceError::ValidationError(format!(
                        "invalid quantity {} for product {}",
                        line.quantity, line.product_id
                    ))
                })?;
                Ok(CheckoutLine {
                    price_id: line.price_id.clone(),
                    quantity,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        let total = priced.iter().map(|line| line.line_total).sum();

        let session_id = generate_session_id(user_id, Utc::now());
        self.users
            .set_outstanding_session(user_id, Some(session_id.clone()))
            .await?;

        let (order, _) = self
            .orders
            .create_or_get(NewOrder {
                user_id,
                session_id: session_id.clone(),
                total,
                lines: priced.iter().map(|line| (line.product_id, line.plan)).collect(),
            })
            .await?;

        let customer = match user.billing_customer_id {
            Some(customer_id) => CustomerKey::Existing(customer_id),
            None => CustomerKey::Email {
                email: user.email.clone(),
                trial_period_days: self.payment.trial_period_days,
            },
        };

        let request = CheckoutSessionRequest {
            session_id: session_id.clone(),
            lines,
            customer,
            success_url: self.payment.success_url.clone(),
            cancel_url: self.payment.cancel_url.clone(),
        };

        let provider = self.provider.clone();
        let session = with_metrics("create_checkout_session", || async move {
            provider.create_checkout_session(request).await
        })
        .await
        .map_err(|e| {
            warn!(%session_id, order_id = %order.id, error = %e, "checkout session failed, order left pending");
            e
        })?;

        self.carts.mark_pending(cart).await?;

        counter!("checkout_sessions_created_total", 1);
        info!(%user_id, order_id = %order.id, %session_id, provider_session = %session.id, "checkout session created");

        Ok(CheckoutResponse {
            url: session.url,
            session_id,
            order_id: order.id,
        })
    }
}

/// `sess_<millis>_<user>_<random>`: unique across users by construction and
/// across one user's concurrent checkouts by the random suffix.
pub fn generate_session_id(user_id: Uuid, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!(
        "sess_{}_{}_{}",
        now.timestamp_millis(),
        user_id.simple(),
        suffix
    )
}

/// Result of starting a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckoutResponse {
    /// Provider-hosted payment page
    #[schema(example = "https://checkout.stripe.com/c/pay/cs_test_123")]
    pub url: String,
    pub session_id: String,
    pub order_id: Uuid,
}
