use crate::{
    entities::commerce::{
        cart, cart_item, Cart, CartItem, CartItemModel, CartModel, CartStatus, Plan, ProductModel,
    },
    errors::ServiceError,
    repositories::{is_unique_violation, UserCriteria, UserRepository},
    services::{catalog::CatalogService, payments::PaymentProvider},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Per-user cart store.
///
/// Carts hold `(product, quantity, plan)` lines that all share one plan. A
/// cart is created on the first successful add and is only ever emptied,
/// never deleted. Every mutation validates before it writes, and writes
/// inside a single transaction.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    users: UserRepository,
    catalog: CatalogService,
    provider: Arc<dyn PaymentProvider>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: CatalogService,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            users: UserRepository::new(db.clone()),
            db,
            catalog,
            provider,
        }
    }

    /// Adds a product to the user's cart.
    ///
    /// Checks run in this order: user and product exist, the plan is known,
    /// quantity is positive, the product is not already in the cart, the plan
    /// matches the existing lines, and the user has no active subscription for
    /// the product. Nothing is written unless all of them pass.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, plan = %input.plan))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        let user = self.users.get_by(&UserCriteria::Id(user_id)).await?;
        let product = self.catalog.get_product(input.product_id).await?;
        let plan =
            Plan::from_str(&input.plan).map_err(|_| ServiceError::InvalidPlan(input.plan.clone()))?;
        let quantity = input.quantity.unwrap_or(1);
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        if let Some(cart) = self.find_cart(&*self.db, user_id).await? {
            let items = Self::items_of(&*self.db, cart.id).await?;
            ensure_compatible(&items, product.id, plan)?;
        }

        if let Some(customer_id) = user.billing_customer_id.as_deref() {
            self.ensure_not_subscribed(customer_id, &product).await?;
        }

        let txn = self.db.begin().await?;

        let cart = match self.find_cart(&txn, user_id).await? {
            Some(cart) => cart,
            None => {
                let now = Utc::now();
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    status: Set(CartStatus::Ready),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::Conflict("cart was created concurrently, retry".to_string())
                    } else {
                        e.into()
                    }
                })?
            }
        };

        // Re-check under the transaction in case a concurrent add slipped in.
        let items = Self::items_of(&txn, cart.id).await?;
        ensure_compatible(&items, product.id, plan)?;
        let position = items.iter().map(|i| i.position + 1).max().unwrap_or(0);

        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product.id),
            quantity: Set(quantity),
            plan: Set(plan),
            position: Set(position),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::ItemExists(product.id)
            } else {
                e.into()
            }
        })?;

        txn.commit().await?;

        info!(%user_id, cart_id = %cart.id, product_id = %product.id, %plan, quantity, "added item to cart");
        self.get_cart(user_id).await
    }

    /// Removes a product from the cart. Removing an absent product succeeds.
    #[instrument(skip(self))]
    pub async fn delete_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;

        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        info!(%user_id, %product_id, removed = result.rows_affected, "deleted cart item");
        self.get_cart(user_id).await
    }

    /// Empties the cart and returns it to `ready`.
    #[instrument(skip(self))]
    pub async fn reset(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;
        self.clear(cart).await
    }

    /// Final step of a paid checkout: empties the cart. Idempotent.
    #[instrument(skip(self))]
    pub async fn validate(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;
        self.clear(cart).await
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;
        let items = Self::items_of(&*self.db, cart.id).await?;
        Ok(CartView::new(cart, items))
    }

    /// Cart with every line priced from the catalog at its plan's current rate.
    #[instrument(skip(self))]
    pub async fn get_cart_prices(&self, user_id: Uuid) -> Result<PricedCart, ServiceError> {
        let cart = self.require_cart(user_id).await?;
        let items = Self::items_of(&*self.db, cart.id).await?;
        let lines = self.price_lines(&items).await?;
        Ok(PricedCart::new(cart, lines))
    }

    /// Prices cart lines. Fails with `ProductNotFound` when a product no
    /// longer resolves and `PriceMismatch` when it has no price for the plan.
    pub async fn price_lines(&self, items: &[CartItemModel]) -> Result<Vec<PricedLine>, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = self.catalog.get_product(item.product_id).await?;
            let price = product
                .price_for(item.plan)
                .ok_or_else(|| ServiceError::PriceMismatch {
                    product_id: product.id,
                    plan: item.plan.to_string(),
                })?;
            lines.push(PricedLine {
                product_id: product.id,
                name: product.name,
                quantity: item.quantity,
                plan: item.plan,
                unit_price: price.amount,
                price_id: price.price_id,
                line_total: price.amount * Decimal::from(item.quantity),
            });
        }
        Ok(lines)
    }

    /// Cart row and lines for checkout, without pricing.
    pub async fn load_for_checkout(
        &self,
        user_id: Uuid,
    ) -> Result<(CartModel, Vec<CartItemModel>), ServiceError> {
        let cart = self.require_cart(user_id).await?;
        let items = Self::items_of(&*self.db, cart.id).await?;
        Ok((cart, items))
    }

    pub async fn mark_pending(&self, cart: CartModel) -> Result<CartModel, ServiceError> {
        if cart.status == CartStatus::Pending {
            return Ok(cart);
        }
        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Pending);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Returns the cart to `ready` after the checkout for `session_id` was
    /// cancelled. Items are kept. A cart held by a newer checkout of the same
    /// user stays `pending`.
    #[instrument(skip(self))]
    pub async fn release_checkout(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<bool, ServiceError> {
        let Some(user) = self.users.find_by(&UserCriteria::Id(user_id)).await? else {
            return Ok(false);
        };
        if user
            .outstanding_session_id
            .as_deref()
            .is_some_and(|current| current != session_id)
        {
            debug!(%user_id, session_id, "cart belongs to a newer checkout");
            return Ok(false);
        }

        let result = Cart::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::Ready))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(CartStatus::Pending))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn clear(&self, cart: CartModel) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let removed = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?
            .rows_affected;

        let cart = if cart.status != CartStatus::Ready {
            let mut active: cart::ActiveModel = cart.into();
            active.status = Set(CartStatus::Ready);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?
        } else {
            cart
        };

        txn.commit().await?;

        info!(cart_id = %cart.id, removed, "cart cleared");
        Ok(CartView::new(cart, Vec::new()))
    }

    async fn ensure_not_subscribed(
        &self,
        customer_id: &str,
        product: &ProductModel,
    ) -> Result<(), ServiceError> {
        let Some(external_id) = product.external_product_id.as_deref() else {
            return Ok(());
        };

        let subscriptions = self.provider.list_active_subscriptions(customer_id).await?;
        if subscriptions
            .iter()
            .any(|sub| sub.product_external_id == external_id)
        {
            return Err(ServiceError::AlreadySubscribed(product.id));
        }
        Ok(())
    }

    async fn find_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?)
    }

    async fn require_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        self.find_cart(&*self.db, user_id)
            .await?
            .ok_or(ServiceError::CartNotFound(user_id))
    }

    async fn items_of<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<CartItemModel>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .all(conn)
            .await?)
    }
}

/// Rejects a product that is already present or whose plan differs from the
/// plan shared by the existing lines.
fn ensure_compatible(
    items: &[CartItemModel],
    product_id: Uuid,
    plan: Plan,
) -> Result<(), ServiceError> {
    if items.iter().any(|item| item.product_id == product_id) {
        return Err(ServiceError::ItemExists(product_id));
    }
    if items.iter().any(|item| !item.plan.compatible_with(plan)) {
        return Err(ServiceError::DifferentPlans);
    }
    Ok(())
}

/// The plan shared by all lines, or `DifferentPlans` if they disagree
pub fn single_plan(items: &[CartItemModel]) -> Result<Option<Plan>, ServiceError> {
    let mut plans = items.iter().map(|item| item.plan);
    let Some(first) = plans.next() else {
        return Ok(None);
    };
    if plans.all(|plan| plan.compatible_with(first)) {
        Ok(Some(first))
    } else {
        Err(ServiceError::DifferentPlans)
    }
}

/// Input for adding item to cart
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    /// One of `monthly`, `yearly`, `free-trial`
    #[validate(length(min = 1, max = 32))]
    #[schema(example = "monthly")]
    pub plan: String,
    /// Defaults to 1
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub plan: Plan,
}

/// Cart as returned by the cart endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CartStatus,
    /// Plan shared by every line; absent for an empty cart
    pub plan: Option<Plan>,
    pub items: Vec<CartLine>,
}

impl CartView {
    fn new(cart: CartModel, items: Vec<CartItemModel>) -> Self {
        Self {
            id: cart.id,
            user_id: cart.user_id,
            status: cart.status,
            plan: items.first().map(|item| item.plan),
            items: items
                .into_iter()
                .map(|item| CartLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    plan: item.plan,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub plan: Plan,
    #[schema(value_type = String, example = "9.99")]
    pub unit_price: Decimal,
    /// Provider price identifier for this plan
    pub price_id: String,
    #[schema(value_type = String, example = "9.99")]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PricedCart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CartStatus,
    pub items: Vec<PricedLine>,
    #[schema(value_type = String, example = "9.99")]
    pub total: Decimal,
}

impl PricedCart {
    fn new(cart: CartModel, items: Vec<PricedLine>) -> Self {
        Self {
            id: cart.id,
            user_id: cart.user_id,
            status: cart.status,
            total: items.iter().map(|line| line.line_total).sum(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::{provider::MockPaymentProvider, ActiveSubscription};
    use assert_matches::assert_matches;

    fn item(product_id: Uuid, plan: Plan, position: i32) -> CartItemModel {
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::nil(),
            product_id,
            quantity: 1,
            plan,
            position,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_product_is_reported_before_plan_mismatch() {
        let product = Uuid::new_v4();
        let items = vec![item(product, Plan::Monthly, 0)];

        assert_matches!(
            ensure_compatible(&items, product, Plan::Yearly),
            Err(ServiceError::ItemExists(id)) if id == product
        );
    }

    #[test]
    fn mixing_plans_is_rejected() {
        let items = vec![item(Uuid::new_v4(), Plan::Monthly, 0)];
        assert_matches!(
            ensure_compatible(&items, Uuid::new_v4(), Plan::Yearly),
            Err(ServiceError::DifferentPlans)
        );
        assert!(ensure_compatible(&items, Uuid::new_v4(), Plan::Monthly).is_ok());
    }

    #[test]
    fn empty_cart_accepts_any_plan() {
        assert!(ensure_compatible(&[], Uuid::new_v4(), Plan::FreeTrial).is_ok());
        assert_matches!(single_plan(&[]), Ok(None));
    }

    #[test]
    fn single_plan_detects_mixed_lines() {
        let items = vec![
            item(Uuid::new_v4(), Plan::Yearly, 0),
            item(Uuid::new_v4(), Plan::Yearly, 1),
        ];
        assert_matches!(single_plan(&items), Ok(Some(Plan::Yearly)));

        let mixed = vec![
            item(Uuid::new_v4(), Plan::Yearly, 0),
            item(Uuid::new_v4(), Plan::FreeTrial, 1),
        ];
        assert_matches!(single_plan(&mixed), Err(ServiceError::DifferentPlans));
    }

    #[test]
    fn add_to_cart_input_defaults_quantity() {
        let input: AddToCartInput = serde_json::from_str(
            r#"{"product_id":"550e8400-e29b-41d4-a716-446655440000","plan":"weekly"}"#,
        )
        .unwrap();
        assert_eq!(input.quantity, None);
        assert_eq!(input.plan, "weekly");
    }

    fn product(external_id: Option<&str>) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            name: "alpha".into(),
            monthly_price: Some(Decimal::new(999, 2)),
            yearly_price: None,
            monthly_price_id: Some("price_alpha_monthly".into()),
            yearly_price_id: None,
            external_product_id: external_id.map(str::to_string),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn service_with(provider: MockPaymentProvider) -> CartService {
        let db = Arc::new(
            sea_orm::Database::connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        CartService::new(db.clone(), CatalogService::new(db), Arc::new(provider))
    }

    #[tokio::test]
    async fn subscription_check_matches_external_product_id() {
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_list_active_subscriptions()
            .withf(|customer| customer == "cus_1")
            .times(2)
            .returning(|_| {
                Ok(vec![ActiveSubscription {
                    product_external_id: "prod_alpha".into(),
                    status: "trialing".into(),
                }])
            });
        let service = service_with(provider).await;

        let subscribed = product(Some("prod_alpha"));
        assert_matches!(
            service.ensure_not_subscribed("cus_1", &subscribed).await,
            Err(ServiceError::AlreadySubscribed(id)) if id == subscribed.id
        );
        assert!(service
            .ensure_not_subscribed("cus_1", &product(Some("prod_beta")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn products_without_external_id_skip_the_provider() {
        let mut provider = MockPaymentProvider::new();
        provider.expect_list_active_subscriptions().never();
        let service = service_with(provider).await;

        assert!(service
            .ensure_not_subscribed("cus_1", &product(None))
            .await
            .is_ok());
    }
}
