use sea_orm::{DatabaseConnection, DbErr, SqlErr};
use std::sync::Arc;

pub mod order_repository;
pub mod user_repository;
pub mod webhook_event_repository;

pub use order_repository::{
    NewOrder, OrderRepository, OrderSearch, OrderSortField, SortDirection, Transition,
};
pub use user_repository::{UserCriteria, UserRepository};
pub use webhook_event_repository::WebhookEventRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// True when the database rejected a write because of a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
