use crate::{
    entities::{
        commerce::Plan,
        order::{Model as OrderModel, OrderStatus},
    },
    errors::ServiceError,
    repositories::{OrderRepository, OrderSearch, Transition, UserRepository},
    services::{catalog::CatalogService, commerce::CartService},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Read side of the order ledger plus the housekeeping that cancels
/// abandoned checkouts.
#[derive(Clone)]
pub struct OrderService {
    orders: OrderRepository,
    users: UserRepository,
    catalog: CatalogService,
    carts: CartService,
}

impl OrderService {
    pub fn new(
        orders: OrderRepository,
        users: UserRepository,
        catalog: CatalogService,
        carts: CartService,
    ) -> Self {
        Self {
            orders,
            users,
            catalog,
            carts,
        }
    }

    /// Order with each line priced at the catalog's current rate for its plan.
    ///
    /// When `owner` is set, orders belonging to anyone else are reported as
    /// missing.
    #[instrument(skip(self))]
    pub async fn get_order_details(
        &self,
        order_id: Uuid,
        owner: Option<Uuid>,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|order| owner.map_or(true, |owner| order.user_id == owner))
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut lines = Vec::new();
        for item in self.orders.items_for(&order).await? {
            let current = match self.catalog.get_product(item.product_id).await {
                Ok(product) => product.price_for(item.plan).map(|p| (product.name, p.amount)),
                Err(ServiceError::ProductNotFound(_)) => None,
                Err(e) => return Err(e),
            };
            if current.is_none() {
                warn!(order_id = %order.id, product_id = %item.product_id, plan = %item.plan, "order line no longer priced");
            }
            let (name, unit_price) = current.unzip();
            lines.push(OrderLineView {
                product_id: item.product_id,
                plan: item.plan,
                name,
                unit_price,
            });
        }

        Ok(OrderDetails {
            order: OrderSummary::from(order),
            items: lines,
        })
    }

    #[instrument(skip(self))]
    pub async fn search(&self, search: OrderSearch) -> Result<OrderPage, ServiceError> {
        let (orders, total) = self.orders.search(&search).await?;
        Ok(OrderPage {
            orders: orders.into_iter().map(OrderSummary::from).collect(),
            total,
            page: search.page.max(1),
            per_page: search.per_page.max(1),
        })
    }

    /// Overwrites the status of the order carrying `session_id`. Operator tool;
    /// webhook reconciliation goes through the guarded transition instead.
    #[instrument(skip(self))]
    pub async fn update_status_by_session_id(
        &self,
        session_id: &str,
        status: OrderStatus,
    ) -> Result<OrderSummary, ServiceError> {
        let order = self
            .orders
            .update_status_by_session_id(session_id, status)
            .await?;
        info!(session_id, order_id = %order.id, %status, "order status overwritten");
        Ok(order.into())
    }

    /// Cancels pending orders created before `cutoff`, returns their carts to
    /// `ready` and releases the outstanding session of any user still
    /// pointing at one. Returns how
    /// many orders were cancelled. Orders that reach a terminal state while
    /// the sweep runs are left alone.
    #[instrument(skip(self))]
    pub async fn cancel_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<usize, ServiceError> {
        let stale = self.orders.find_stale_pending(cutoff).await?;
        let mut cancelled = 0;

        for order in stale {
            let Some(session_id) = order.session_id.as_deref() else {
                continue;
            };
            match self
                .orders
                .transition_pending(session_id, OrderStatus::Cancelled)
                .await?
            {
                Transition::Applied(order) => {
                    cancelled += 1;
                    self.carts.release_checkout(order.user_id, session_id).await?;
                    self.users.clear_outstanding_session(session_id).await?;
                }
                Transition::AlreadyTerminal(_) => {}
            }
        }

        if cancelled > 0 {
            info!(cancelled, %cutoff, "cancelled stale pending orders");
        }
        Ok(cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(value_type = String, example = "19.98")]
    pub total: Decimal,
    pub status: OrderStatus,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummary {
    fn from(order: OrderModel) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            total: order.total,
            status: order.status,
            session_id: order.session_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Order line with the product's current pricing; `name` and `unit_price`
/// are absent when the product or its plan price is gone from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderLineView {
    pub product_id: Uuid,
    pub plan: Plan,
    pub name: Option<String>,
    #[schema(value_type = Option<String>, example = "9.99")]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub items: Vec<OrderLineView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<OrderSummary>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}
