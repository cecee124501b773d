use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::debug;

use crate::entities::webhook_event::{ActiveModel, Entity as WebhookEvent};
use crate::errors::ServiceError;
use crate::repositories::{is_unique_violation, BaseRepository, Repository};

/// Ledger of provider event ids that were already reconciled
#[derive(Debug, Clone)]
pub struct WebhookEventRepository {
    base: BaseRepository,
}

impl WebhookEventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Records `event_id` as processed. Returns `false` when it was already
    /// recorded by an earlier (or concurrent) delivery.
    pub async fn claim(&self, event_id: &str, event_type: &str) -> Result<bool, ServiceError> {
        let row = ActiveModel {
            event_id: Set(event_id.to_string()),
            event_type: Set(event_type.to_string()),
            processed_at: Set(Utc::now()),
        };

        match row.insert(self.base.get_db()).await {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                debug!(event_id, "webhook event already processed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forgets a claim so a redelivery of a failed event is applied again
    pub async fn release(&self, event_id: &str) -> Result<(), ServiceError> {
        WebhookEvent::delete_by_id(event_id.to_string())
            .exec(self.base.get_db())
            .await?;
        Ok(())
    }
}

impl Repository for WebhookEventRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
