#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_billing::{
    build_router,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{commerce::product, order, user},
    errors::ServiceError,
    services::payments::{
        ActiveSubscription, CheckoutSessionRequest, PaymentProvider, ProviderSession,
    },
    webhooks::{self, SIGNATURE_HEADER},
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-process stand-in for the payment provider. Records every checkout
/// request and serves canned subscriptions.
#[derive(Default)]
pub struct FakePaymentProvider {
    pub checkout_requests: Mutex<Vec<CheckoutSessionRequest>>,
    pub subscriptions: Mutex<Vec<ActiveSubscription>>,
    pub fail_checkout: Mutex<bool>,
}

impl FakePaymentProvider {
    pub fn set_subscriptions(&self, product_external_ids: &[&str]) {
        *self.subscriptions.lock().unwrap() = product_external_ids
            .iter()
            .map(|id| ActiveSubscription {
                product_external_id: id.to_string(),
                status: "active".to_string(),
            })
            .collect();
    }

    pub fn fail_next_checkouts(&self, fail: bool) {
        *self.fail_checkout.lock().unwrap() = fail;
    }

    pub fn last_checkout(&self) -> Option<CheckoutSessionRequest> {
        self.checkout_requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProviderSession, ServiceError> {
        if *self.fail_checkout.lock().unwrap() {
            return Err(ServiceError::ExternalServiceError(
                "provider unavailable".to_string(),
            ));
        }
        let url = format!("https://pay.test/{}", request.session_id);
        let id = format!("cs_test_{}", request.session_id);
        self.checkout_requests.lock().unwrap().push(request);
        Ok(ProviderSession { id, url })
    }

    async fn list_active_subscriptions(
        &self,
        _billing_customer_id: &str,
    ) -> Result<Vec<ActiveSubscription>, ServiceError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }
}

/// Helper harness for spinning up the application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub provider: Arc<FakePaymentProvider>,
}

impl TestApp {
    /// Fresh database without webhook signature checks
    pub async fn new() -> Self {
        Self::with_webhook_secret(None).await
    }

    pub async fn with_webhook_secret(secret: Option<&str>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // One connection so every query sees the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment.webhook_secret = secret.map(str::to_string);
        cfg.payment.success_url = "https://shop.test/success".to_string();
        cfg.payment.cancel_url = "https://shop.test/cancel".to_string();

        let pool = db::establish_connection_with_config(&DbConfig::from(&cfg))
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let provider = Arc::new(FakePaymentProvider::default());
        let state = Arc::new(AppState::new(
            Arc::new(pool),
            cfg,
            provider.clone() as Arc<dyn PaymentProvider>,
        ));
        let router = build_router(state.clone());

        Self {
            router,
            state,
            provider,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(user_id, None, vec![])
            .expect("issue token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token(Uuid::new_v4(), None, vec!["admin".to_string()])
            .expect("issue token")
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            name: Set(None),
            billing_customer_id: Set(None),
            outstanding_session_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    /// Product priced for both plans with provider price ids derived from `name`
    pub async fn seed_product(
        &self,
        name: &str,
        monthly: Option<Decimal>,
        yearly: Option<Decimal>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            monthly_price: Set(monthly),
            yearly_price: Set(yearly),
            monthly_price_id: Set(monthly.map(|_| format!("price_{}_monthly", name))),
            yearly_price_id: Set(yearly.map(|_| format!("price_{}_yearly", name))),
            external_product_id: Set(Some(format!("prod_{}", name))),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn user(&self, id: Uuid) -> user::Model {
        user::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load user")
            .expect("user exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.send(request).await
    }

    /// Posts a webhook, signing it when `signature_secret` is given
    pub async fn webhook(&self, payload: &Value, signature_secret: Option<&str>) -> (StatusCode, Value) {
        let body = payload.to_string();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = signature_secret {
            let ts = Utc::now().timestamp();
            let sig = webhooks::payment_events::sign_payload(secret, ts, body.as_bytes())
                .expect("sign payload");
            builder = builder.header(SIGNATURE_HEADER, format!("t={},v1={}", ts, sig));
        }
        let request = builder.body(Body::from(body)).expect("build request");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

pub fn event(kind: &str, object: Value) -> Value {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": kind,
        "data": { "object": object }
    })
}
