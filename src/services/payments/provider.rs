use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ServiceError;

/// How the provider should identify the paying customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerKey {
    /// No billing customer yet: the provider creates one from the e-mail and
    /// starts the subscription with a trial.
    Email {
        email: String,
        trial_period_days: u32,
    },
    /// Known provider customer id
    Existing(String),
}

/// One provider price line of a checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub price_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    /// Our correlator; echoed back by the provider on every related event
    pub session_id: String,
    pub lines: Vec<CheckoutLine>,
    pub customer: CustomerKey,
    pub success_url: String,
    pub cancel_url: String,
}

/// Checkout session minted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub product_external_id: String,
    pub status: String,
}

/// External payment provider. Injected into the checkout broker and the
/// cart store so tests can substitute a fake.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProviderSession, ServiceError>;

    /// Subscriptions that currently entitle the customer (active or trialing)
    async fn list_active_subscriptions(
        &self,
        billing_customer_id: &str,
    ) -> Result<Vec<ActiveSubscription>, ServiceError>;
}
