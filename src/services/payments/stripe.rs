use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::provider::{
    ActiveSubscription, CheckoutSessionRequest, CustomerKey, PaymentProvider,
    ProviderSession,
};
use crate::config::PaymentConfig;
use crate::errors::ServiceError;

const ENTITLING_STATUSES: [&str; 2] = ["active", "trialing"];

/// Stripe-compatible REST client (form-encoded requests, bearer secret key)
#[derive(Clone)]
pub struct StripeProvider {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    data: Vec<SubscriptionObject>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    status: String,
    items: SubscriptionItems,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: SubscriptionPrice,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPrice {
    product: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeProvider {
    pub fn new(config: &PaymentConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Flattens a checkout request into the bracketed form fields the API
    /// expects. Sessions are always opened in subscription mode.
    fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                request.session_id.clone(),
            ),
            (
                "metadata[session_id]".to_string(),
                request.session_id.clone(),
            ),
        ];

        for (i, line) in request.lines.iter().enumerate() {
            form.push((format!("line_items[{}][price]", i), line.price_id.clone()));
            form.push((
                format!("line_items[{}][quantity]", i),
                line.quantity.to_string(),
            ));
        }

        // Invoices and payment intents inherit subscription metadata.
        form.push((
            "subscription_data[metadata][session_id]".to_string(),
            request.session_id.clone(),
        ));

        match &request.customer {
            CustomerKey::Existing(customer_id) => {
                form.push(("customer".to_string(), customer_id.clone()));
            }
            CustomerKey::Email {
                email,
                trial_period_days,
            } => {
                form.push(("customer_email".to_string(), email.clone()));
                if *trial_period_days > 0 {
                    form.push((
                        "subscription_data[trial_period_days]".to_string(),
                        trial_period_days.to_string(),
                    ));
                }
            }
        }

        form
    }

    async fn upstream_error(operation: &str, response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let message = response
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| "no error message".to_string());

        counter!("payment_provider_errors_total", 1, "operation" => operation.to_string());
        warn!(operation, %status, %message, "payment provider rejected request");
        ServiceError::ExternalServiceError(format!("{} failed with {}: {}", operation, status, message))
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> ServiceError {
    counter!("payment_provider_errors_total", 1, "operation" => operation.to_string());
    warn!(operation, error = %err, "payment provider unreachable");
    ServiceError::ExternalServiceError(format!("{} request failed: {}", operation, err))
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProviderSession, ServiceError> {
        const OP: &str = "create_checkout_session";

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&Self::checkout_form(&request))
            .send()
            .await
            .map_err(|e| transport_error(OP, e))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(OP, response).await);
        }

        let body: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| transport_error(OP, e))?;

        let url = body.url.ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "checkout session {} returned without a redirect url",
                body.id
            ))
        })?;

        debug!(provider_session = %body.id, "checkout session created");
        Ok(ProviderSession { id: body.id, url })
    }

    #[instrument(skip(self))]
    async fn list_active_subscriptions(
        &self,
        billing_customer_id: &str,
    ) -> Result<Vec<ActiveSubscription>, ServiceError> {
        const OP: &str = "list_subscriptions";

        let response = self
            .client
            .get(self.url("/v1/subscriptions"))
            .bearer_auth(&self.secret_key)
            .query(&[("customer", billing_customer_id), ("limit", "100")])
            .send()
            .await
            .map_err(|e| transport_error(OP, e))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(OP, response).await);
        }

        let list: SubscriptionList = response
            .json()
            .await
            .map_err(|e| transport_error(OP, e))?;

        Ok(list
            .data
            .into_iter()
            .filter(|sub| ENTITLING_STATUSES.contains(&sub.status.as_str()))
            .flat_map(|sub| {
                let status = sub.status;
                sub.items.data.into_iter().map(move |item| ActiveSubscription {
                    product_external_id: item.price.product,
                    status: status.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::CheckoutLine;

    fn request(customer: CustomerKey) -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            session_id: "sess_1".into(),
            lines: vec![
                CheckoutLine {
                    price_id: "price_a".into(),
                    quantity: 1,
                },
                CheckoutLine {
                    price_id: "price_b".into(),
                    quantity: 2,
                },
            ],
            customer,
            success_url: "https://shop.test/ok".into(),
            cancel_url: "https://shop.test/cancel".into(),
        }
    }

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn new_customer_is_keyed_by_email_with_trial() {
        let form = StripeProvider::checkout_form(&request(CustomerKey::Email {
            email: "a@b.test".into(),
            trial_period_days: 7,
        }));

        assert_eq!(field(&form, "customer_email"), Some("a@b.test"));
        assert_eq!(field(&form, "subscription_data[trial_period_days]"), Some("7"));
        assert_eq!(field(&form, "customer"), None);
        assert_eq!(field(&form, "line_items[1][price]"), Some("price_b"));
        assert_eq!(field(&form, "line_items[1][quantity]"), Some("2"));
        assert_eq!(field(&form, "client_reference_id"), Some("sess_1"));
        assert_eq!(
            field(&form, "subscription_data[metadata][session_id]"),
            Some("sess_1")
        );
    }

    #[test]
    fn known_customer_is_keyed_by_id_without_trial() {
        let form = StripeProvider::checkout_form(&request(CustomerKey::Existing("cus_9".into())));

        assert_eq!(field(&form, "customer"), Some("cus_9"));
        assert_eq!(field(&form, "customer_email"), None);
        assert_eq!(field(&form, "subscription_data[trial_period_days]"), None);
        assert_eq!(field(&form, "mode"), Some("subscription"));
    }
}
