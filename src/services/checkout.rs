use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::cart::Cart;
use crate::models::order::{Order, OrderDetails, OrderKind, OrderStatus, PaymentMethod};
use crate::repositories::{CouponRepository, OrderRepository};
use crate::services::coupons::{CouponPolicy, CouponValidation, CouponValidator};
use crate::services::identifiers::IdentifierGenerator;

/// Variant-specific checkout input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckoutKind {
    /// Logged-in customer; coupons apply here only.
    Scheduled {
        customer_id: Uuid,
        coupon_code: Option<String>,
        pickup_at: Option<DateTime<Utc>>,
    },
    /// No login required.
    Express {
        customer_id: Option<Uuid>,
        pickup_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub cart: Cart,
    pub kind: CheckoutKind,
    pub payment_method: PaymentMethod,
}

/// The stored order plus the pricing that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub details: OrderDetails,
    pub subtotal: Decimal,
    pub discount: Decimal,
    /// Present when a coupon code was supplied, valid or not.
    pub coupon: Option<CouponValidation>,
}

impl CheckoutReceipt {
    /// Set when a supplied coupon was not applied.
    pub fn coupon_warning(&self) -> Option<&str> {
        self.coupon
            .as_ref()
            .filter(|c| !c.valid)
            .map(|c| c.message.as_str())
    }
}

/// `max(0, subtotal - discount)`.
pub fn clamp_total(subtotal: Decimal, discount: Decimal) -> Decimal {
    (subtotal - discount).max(Decimal::ZERO)
}

/// Turns a cart into a stored order.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderRepository>,
    coupons: CouponValidator,
    identifiers: Arc<IdentifierGenerator>,
    event_sender: Option<Arc<EventSender>>,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderRepository>,
        coupons: CouponValidator,
        identifiers: Arc<IdentifierGenerator>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            coupons,
            identifiers,
            event_sender,
        }
    }

    /// Wires the default repositories and generator from configuration.
    pub fn from_config(
        db: Arc<DatabaseConnection>,
        cfg: &AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let coupons = CouponValidator::with_policy(
            Arc::new(CouponRepository::new(db.clone())),
            CouponPolicy::from(cfg),
        );
        Self::new(
            Arc::new(OrderRepository::new(db).with_coupon_usage_cap(cfg.enforce_coupon_usage_cap)),
            coupons,
            Arc::new(IdentifierGenerator::from(cfg)),
            event_sender,
        )
    }

    #[instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, ServiceError> {
        let started = Instant::now();
        let CheckoutRequest {
            cart,
            kind,
            payment_method,
        } = request;

        cart.validate_all()?;
        let subtotal = cart.subtotal();

        let mut coupon = match &kind {
            CheckoutKind::Scheduled {
                coupon_code: Some(code),
                ..
            } if !code.trim().is_empty() => self.check_coupon(code, subtotal).await?,
            _ => None,
        };
        let applied = coupon.as_ref().filter(|c| c.valid);
        let mut discount = applied.map(|c| c.discount_amount).unwrap_or(Decimal::ZERO);
        let mut coupon_id = applied.and_then(|c| c.coupon_id);
        let mut total = clamp_total(subtotal, discount);

        let line_items = cart.to_line_items();
        let (customer_id, pickup_at) = match &kind {
            CheckoutKind::Scheduled {
                customer_id,
                pickup_at,
                ..
            } => (Some(*customer_id), *pickup_at),
            CheckoutKind::Express {
                customer_id,
                pickup_at,
            } => (*customer_id, *pickup_at),
        };
        let pin = self.identifiers.generate_pin();

        let max_attempts = self.identifiers.max_attempts();
        let mut attempt = 0;
        let details = loop {
            attempt += 1;
            let order_number = self
                .identifiers
                .generate_order_number(self.orders.as_ref())
                .await?;
            let order_kind = match &kind {
                CheckoutKind::Scheduled { .. } => OrderKind::Scheduled { coupon_id },
                CheckoutKind::Express { .. } => OrderKind::Express {
                    folio: self.identifiers.generate_folio(),
                    pin: pin.clone(),
                },
            };
            let order = Order {
                id: None,
                order_number,
                customer_id,
                status: OrderStatus::Pending,
                payment_method,
                total_amount: total,
                pickup_at,
                delivered_at: None,
                created_at: Utc::now(),
                kind: order_kind,
            };

            match self.orders.insert_order(order, line_items.clone()).await {
                Ok(details) => break details,
                // Another checkout took the last use after validation.
                Err(ServiceError::CouponExhausted(id)) if coupon_id == Some(id) => {
                    warn!(coupon_id = id, "Coupon ran out before commit, continuing without discount");
                    coupon = Some(CouponValidation::rejected(
                        "coupon usage limit reached",
                        Some(id),
                    ));
                    discount = Decimal::ZERO;
                    coupon_id = None;
                    total = subtotal;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    counter!("bakery_orders.checkout.retries", 1);
                    warn!(attempt, error = %e, "Identifier collision, retrying checkout");
                }
                Err(e) => {
                    counter!("bakery_orders.checkout.failed", 1, "kind" => e.kind().to_string());
                    return Err(e);
                }
            }
        };

        let order_id = details.order.id.unwrap_or_default();
        counter!("bakery_orders.orders.created", 1, "type" => details.order.kind.order_type().to_string());
        histogram!("bakery_orders.checkout.duration", started.elapsed());
        info!(
            order_id,
            order_number = details.order.order_number,
            total = %total,
            "Checkout completed"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id,
                    order_number: details.order.order_number,
                    kind: details.order.kind.order_type(),
                });
            if let Some(coupon_id) = coupon_id {
                sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id,
                        order_id,
                    });
            }
        }

        Ok(CheckoutReceipt {
            details,
            subtotal,
            discount,
            coupon,
        })
    }

    /// An unusable coupon never fails checkout; storage errors still do.
    async fn check_coupon(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<Option<CouponValidation>, ServiceError> {
        match self.coupons.validate(code, subtotal).await {
            Ok(validation) => {
                if !validation.valid {
                    warn!(code, message = %validation.message, "Coupon not applied");
                }
                Ok(Some(validation))
            }
            Err(ServiceError::ValidationError(message)) => {
                warn!(code, %message, "Coupon not applied");
                Ok(Some(CouponValidation {
                    valid: false,
                    message,
                    discount_amount: Decimal::ZERO,
                    coupon_id: None,
                }))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_clamped_at_zero() {
        assert_eq!(clamp_total(dec!(55), dec!(5.5)), dec!(49.5));
        assert_eq!(clamp_total(dec!(10), dec!(10)), Decimal::ZERO);
        assert_eq!(clamp_total(dec!(10), dec!(12.5)), Decimal::ZERO);
    }

    #[test]
    fn checkout_kind_uses_type_tag() {
        let kind: CheckoutKind = serde_json::from_str(
            r#"{"type":"express","customer_id":null,"pickup_at":null}"#,
        )
        .unwrap();
        assert_eq!(
            kind,
            CheckoutKind::Express {
                customer_id: None,
                pickup_at: None
            }
        );
    }
}
