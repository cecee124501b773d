use super::plan::Plan;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog product with per-plan pricing
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub monthly_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub yearly_price: Option<Decimal>,
    /// Provider price identifier for the monthly plan
    #[sea_orm(nullable)]
    pub monthly_price_id: Option<String>,
    /// Provider price identifier for the yearly plan
    #[sea_orm(nullable)]
    pub yearly_price_id: Option<String>,
    /// Provider product identifier, matched against active subscriptions
    #[sea_orm(nullable)]
    pub external_product_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Amount and provider price id for one plan of a product
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanPrice {
    pub amount: Decimal,
    pub price_id: String,
}

impl Model {
    /// Resolves the price for `plan`. A free trial bills at the monthly rate
    /// once the trial ends, so it shares the monthly price.
    pub fn price_for(&self, plan: Plan) -> Option<PlanPrice> {
        let (amount, price_id) = match plan {
            Plan::Monthly | Plan::FreeTrial => (self.monthly_price, &self.monthly_price_id),
            Plan::Yearly => (self.yearly_price, &self.yearly_price_id),
        };
        Some(PlanPrice {
            amount: amount?,
            price_id: price_id.clone()?,
        })
    }
}
