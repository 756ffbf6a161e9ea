use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub code: String,
    /// Percentage off the subtotal, 0 to 100.
    pub discount_percentage: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_count: i32,
    /// `None` means unlimited.
    pub usage_limit: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_until
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .map(|limit| self.usage_count >= limit)
            .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::scheduled_order::Entity")]
    ScheduledOrder,
}

impl Related<super::scheduled_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
