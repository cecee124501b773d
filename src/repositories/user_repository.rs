use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entities::user::{ActiveModel as UserActiveModel, Column, Entity as User, Model as UserModel};
use crate::errors::ServiceError;
use crate::repositories::{BaseRepository, Repository};

/// Lookup keys supported by the user directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCriteria {
    Id(Uuid),
    Email(String),
    SessionId(String),
    BillingCustomerId(String),
}

impl fmt::Display for UserCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserCriteria::Id(id) => write!(f, "id={}", id),
            UserCriteria::Email(email) => write!(f, "email={}", email),
            UserCriteria::SessionId(session) => write!(f, "session_id={}", session),
            UserCriteria::BillingCustomerId(customer) => {
                write!(f, "billing_customer_id={}", customer)
            }
        }
    }
}

/// Repository for the user fields checkout and reconciliation depend on
#[derive(Debug, Clone)]
pub struct UserRepository {
    base: BaseRepository,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Finds a single user matching `criteria`
    pub async fn find_by(&self, criteria: &UserCriteria) -> Result<Option<UserModel>, ServiceError> {
        let query = match criteria {
            UserCriteria::Id(id) => User::find_by_id(*id),
            UserCriteria::Email(email) => {
                User::find().filter(Column::Email.eq(email.trim()))
            }
            UserCriteria::SessionId(session_id) => {
                User::find().filter(Column::OutstandingSessionId.eq(session_id.as_str()))
            }
            UserCriteria::BillingCustomerId(customer_id) => {
                User::find().filter(Column::BillingCustomerId.eq(customer_id.as_str()))
            }
        };

        Ok(query.one(self.base.get_db()).await?)
    }

    /// Like [`find_by`](Self::find_by) but maps absence to `UserNotFound`
    pub async fn get_by(&self, criteria: &UserCriteria) -> Result<UserModel, ServiceError> {
        self.find_by(criteria)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(criteria.to_string()))
    }

    /// Overwrites (or clears) the user's outstanding checkout session
    pub async fn set_outstanding_session(
        &self,
        user_id: Uuid,
        session_id: Option<String>,
    ) -> Result<(), ServiceError> {
        let result = User::update_many()
            .col_expr(Column::OutstandingSessionId, Expr::value(session_id))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(user_id))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::UserNotFound(UserCriteria::Id(user_id).to_string()));
        }
        Ok(())
    }

    /// Clears `session_id` from whichever user still holds it. Returns whether a
    /// user was updated; a newer checkout that overwrote the field is left alone.
    pub async fn clear_outstanding_session(&self, session_id: &str) -> Result<bool, ServiceError> {
        let result = User::update_many()
            .col_expr(Column::OutstandingSessionId, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::OutstandingSessionId.eq(session_id))
            .exec(self.base.get_db())
            .await?;

        debug!(session_id, rows = result.rows_affected, "cleared outstanding session");
        Ok(result.rows_affected > 0)
    }

    /// Stores the provider customer id. Re-applying the same value is a no-op.
    pub async fn set_billing_customer_id(
        &self,
        user: UserModel,
        customer_id: &str,
    ) -> Result<UserModel, ServiceError> {
        if user.billing_customer_id.as_deref() == Some(customer_id) {
            return Ok(user);
        }

        let mut active: UserActiveModel = user.into();
        active.billing_customer_id = Set(Some(customer_id.to_string()));
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.base.get_db()).await?)
    }
}

impl Repository for UserRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
