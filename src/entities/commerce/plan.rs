use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Billing cadence of a cart or order line.
///
/// Parsing is strict: anything other than `monthly`, `yearly` or `free-trial`
/// is rejected by [`std::str::FromStr`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum Plan {
    #[sea_orm(string_value = "monthly")]
    #[serde(rename = "monthly")]
    #[strum(serialize = "monthly")]
    Monthly,
    #[sea_orm(string_value = "yearly")]
    #[serde(rename = "yearly")]
    #[strum(serialize = "yearly")]
    Yearly,
    #[sea_orm(string_value = "free-trial")]
    #[serde(rename = "free-trial")]
    #[strum(serialize = "free-trial")]
    FreeTrial,
}

impl Plan {
    /// Whether two plans may share a cart.
    pub fn compatible_with(self, other: Plan) -> bool {
        self == other
    }
}
