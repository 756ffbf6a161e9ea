use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Enum representing the lifecycle states of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Ready")]
    Ready,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    /// Prepared but never picked up.
    #[sea_orm(string_value = "Unclaimed")]
    Unclaimed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Unclaimed)
    }

    /// Structural legality of `self -> next`, ignoring who asks and the PIN.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Delivered)
                | (Pending, Cancelled)
                | (Ready, Delivered)
                | (Ready, Cancelled)
                | (Ready, Unclaimed)
        )
    }
}

/// How the customer pays at checkout.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cash")]
    Cash,
    #[sea_orm(string_value = "credit")]
    Credit,
    #[sea_orm(string_value = "debit")]
    Debit,
}

/// Discriminator stored on the order header; selects the extension table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderType {
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "express")]
    Express,
}

/// Variant-specific order data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    /// Placed by a logged-in customer; may carry a coupon.
    Scheduled { coupon_id: Option<i32> },
    /// Placed without login; collected with the folio and PIN.
    Express { folio: String, pin: String },
}

impl OrderKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Scheduled { .. } => OrderType::Scheduled,
            OrderKind::Express { .. } => OrderType::Express,
        }
    }

    pub fn folio(&self) -> Option<&str> {
        match self {
            OrderKind::Express { folio, .. } => Some(folio),
            OrderKind::Scheduled { .. } => None,
        }
    }
}

/// An order header plus its variant data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Assigned by the store on insert.
    pub id: Option<i32>,
    pub order_number: i32,
    pub customer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    /// Requested pickup time, if the customer chose one.
    pub pickup_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub kind: OrderKind,
}

impl Order {
    pub fn is_express(&self) -> bool {
        matches!(self.kind, OrderKind::Express { .. })
    }

    /// Checks the invariants every order must satisfy before it is written.
    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.total_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Order total must not be negative, got {}",
                self.total_amount
            )));
        }
        match &self.kind {
            OrderKind::Scheduled { .. } if self.customer_id.is_none() => {
                Err(ServiceError::ValidationError(
                    "Scheduled orders require a customer".to_string(),
                ))
            }
            OrderKind::Express { folio, pin } if folio.trim().is_empty() || pin.is_empty() => {
                Err(ServiceError::ValidationError(
                    "Express orders require a folio and a PIN".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// One product/quantity/price entry; immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Set once the owning order has been persisted.
    pub order_id: Option<i32>,
    pub product_id: i32,
    pub quantity: i32,
    /// Price captured at checkout, never re-read from the catalog.
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub note: Option<String>,
}

impl LineItem {
    pub fn new(product_id: i32, quantity: i32, unit_price: Decimal, note: Option<String>) -> Self {
        Self {
            order_id: None,
            product_id,
            quantity,
            unit_price,
            subtotal: unit_price * Decimal::from(quantity),
            note: note.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be positive",
                self.product_id
            )));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Unit price for product {} must not be negative",
                self.product_id
            )));
        }
        if self.subtotal != self.unit_price * Decimal::from(self.quantity) {
            return Err(ServiceError::ValidationError(format!(
                "Subtotal for product {} does not equal quantity x unit price",
                self.product_id
            )));
        }
        Ok(())
    }
}

/// An order together with its line items, as read from or written to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub line_items: Vec<LineItem>,
}
