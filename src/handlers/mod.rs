pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::{
    config::AppConfig,
    repositories::{OrderRepository, UserRepository, WebhookEventRepository},
    services::{
        catalog::CatalogService,
        commerce::{CartService, CheckoutService},
        orders::OrderService,
        payments::PaymentProvider,
        reconciliation::WebhookReconciler,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub reconciler: Arc<WebhookReconciler>,
}

impl AppServices {
    /// Wire every service against one database handle and one payment provider.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let users = UserRepository::new(db.clone());
        let order_repo = OrderRepository::new(db.clone());
        let catalog = CatalogService::new(db.clone());

        let events = WebhookEventRepository::new(db.clone());
        let cart = CartService::new(db, catalog.clone(), provider.clone());
        let checkout = CheckoutService::new(
            users.clone(),
            order_repo.clone(),
            cart.clone(),
            provider,
            config.payment.clone(),
        );
        let orders = OrderService::new(order_repo.clone(), users.clone(), catalog, cart.clone());
        let reconciler = WebhookReconciler::new(users, order_repo, cart.clone(), events);

        Self {
            cart: Arc::new(cart),
            checkout: Arc::new(checkout),
            orders: Arc::new(orders),
            reconciler: Arc::new(reconciler),
        }
    }
}
