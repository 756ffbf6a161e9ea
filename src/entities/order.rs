use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::{OrderStatus, OrderType, PaymentMethod};

/// Order header shared by both order variants.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub order_number: i32,
    pub order_type: OrderType,
    /// Absent for express orders placed without login.
    pub customer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    pub pickup_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::scheduled_order::Entity")]
    ScheduledOrder,
    #[sea_orm(has_one = "super::express_order::Entity")]
    ExpressOrder,
    #[sea_orm(has_many = "super::order_line_item::Entity")]
    OrderLineItem,
}

impl Related<super::scheduled_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledOrder.def()
    }
}

impl Related<super::express_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExpressOrder.def()
    }
}

impl Related<super::order_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLineItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
