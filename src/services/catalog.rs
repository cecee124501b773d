use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::commerce::{Product, ProductModel};
use crate::errors::ServiceError;

/// Read-only product lookup used for pricing carts and orders.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves an active product; inactive products are treated as missing.
    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .filter(|product| product.active)
            .ok_or(ServiceError::ProductNotFound(id))
    }
}
