use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::commerce::Plan;
use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel, OrderStatus,
};
use crate::entities::order_item::{self, Entity as OrderItem, Model as OrderItemModel};
use crate::errors::ServiceError;
use crate::repositories::{is_unique_violation, BaseRepository, Repository};

/// Everything needed to open a pending order for a checkout session
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub session_id: String,
    pub total: Decimal,
    /// `(product_id, plan)` in cart order
    pub lines: Vec<(Uuid, Plan)>,
}

/// Outcome of a guarded `pending -> terminal` transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The order was pending and now carries the requested status
    Applied(OrderModel),
    /// The order had already left `pending`; nothing was written
    AlreadyTerminal(OrderModel),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderSortField {
    #[default]
    Date,
    Total,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters, pagination and ordering for order listings. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct OrderSearch {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub session_id: Option<String>,
    pub page: u64,
    pub per_page: u64,
    pub sort_by: OrderSortField,
    pub direction: SortDirection,
}

impl Default for OrderSearch {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            session_id: None,
            page: 1,
            per_page: 20,
            sort_by: OrderSortField::default(),
            direction: SortDirection::default(),
        }
    }
}

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(self.base.get_db()).await?)
    }

    pub async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::SessionId.eq(session_id))
            .one(self.base.get_db())
            .await?)
    }

    /// Get order lines in their original cart order
    pub async fn items_for(&self, order: &OrderModel) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(order
            .find_related(OrderItem)
            .order_by_asc(order_item::Column::Position)
            .all(self.base.get_db())
            .await?)
    }

    /// Creates a pending order for `new.session_id`, or returns the order that
    /// already carries that session id. The boolean is `true` when a row was
    /// inserted.
    ///
    /// The unique index on `orders.session_id` arbitrates concurrent callers:
    /// whoever loses the insert race reads back the winner's row.
    pub async fn create_or_get(&self, new: NewOrder) -> Result<(OrderModel, bool), ServiceError> {
        if let Some(existing) = self.find_by_session_id(&new.session_id).await? {
            debug!(session_id = %new.session_id, order_id = %existing.id, "order already exists");
            return Ok((existing, false));
        }

        let db = self.base.get_db();
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await?;
        let inserted = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(new.user_id),
            total: Set(new.total),
            status: Set(OrderStatus::Pending),
            session_id: Set(Some(new.session_id.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await;

        let order = match inserted {
            Ok(order) => order,
            Err(err) if is_unique_violation(&err) => {
                txn.rollback().await?;
                let existing = self
                    .find_by_session_id(&new.session_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "order for session {} vanished after unique violation",
                            new.session_id
                        ))
                    })?;
                debug!(session_id = %new.session_id, order_id = %existing.id, "lost order insert race");
                return Ok((existing, false));
            }
            Err(err) => return Err(err.into()),
        };

        for (position, (product_id, plan)) in new.lines.iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(*product_id),
                plan: Set(*plan),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(order_id = %order.id, session_id = %new.session_id, total = %order.total, "created pending order");
        Ok((order, true))
    }

    /// Unconditionally overwrites the status of the order carrying `session_id`
    pub async fn update_status_by_session_id(
        &self,
        session_id: &str,
        status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = self
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(session_id.to_string()))?;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(status);
        Ok(active.update(self.base.get_db()).await?)
    }

    /// Moves the order for `session_id` from `pending` to `to` with a single
    /// conditional update, so a terminal status is never overwritten.
    pub async fn transition_pending(
        &self,
        session_id: &str,
        to: OrderStatus,
    ) -> Result<Transition, ServiceError> {
        let result = Order::update_many()
            .col_expr(Column::Status, Expr::value(to))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::Status.eq(OrderStatus::Pending))
            .exec(self.base.get_db())
            .await?;

        let order = self
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(session_id.to_string()))?;

        if result.rows_affected > 0 {
            info!(session_id, order_id = %order.id, status = %to, "order transitioned");
            Ok(Transition::Applied(order))
        } else {
            debug!(session_id, current = %order.status, requested = %to, "order already terminal");
            Ok(Transition::AlreadyTerminal(order))
        }
    }

    /// Filtered, sorted page of orders plus the total number of matches
    pub async fn search(
        &self,
        search: &OrderSearch,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find();

        if let Some(user_id) = search.user_id {
            query = query.filter(Column::UserId.eq(user_id));
        }
        if let Some(status) = search.status {
            query = query.filter(Column::Status.eq(status));
        }
        if let Some(session_id) = &search.session_id {
            query = query.filter(Column::SessionId.eq(session_id.as_str()));
        }

        let column = match search.sort_by {
            OrderSortField::Date => Column::CreatedAt,
            OrderSortField::Total => Column::Total,
            OrderSortField::Status => Column::Status,
        };
        query = match search.direction {
            SortDirection::Asc => query.order_by_asc(column),
            SortDirection::Desc => query.order_by_desc(column),
        };
        // Stable paging when the sort key ties
        query = query.order_by_asc(Column::Id);

        let paginator = query.paginate(self.base.get_db(), search.per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(search.page.max(1) - 1).await?;

        Ok((orders, total))
    }

    /// Pending orders created strictly before `cutoff`
    pub async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::Status.eq(OrderStatus::Pending))
            .filter(Column::CreatedAt.lt(cutoff))
            .order_by_asc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
