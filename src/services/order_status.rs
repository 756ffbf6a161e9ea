use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::with_transaction;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::order::{Order, OrderKind, OrderStatus};
use crate::repositories::order_repository::{load_order, update_status};

/// Who is asking for a transition. Passed explicitly on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Actor {
    Staff { employee_id: Uuid },
    Customer { customer_id: Uuid },
}

/// Decides whether `actor` may move `order` to `to`, without touching storage.
///
/// Checks run in this order: structural legality, then the actor's rights,
/// then the PIN gate on express deliveries.
pub fn check_transition(
    order: &Order,
    actor: &Actor,
    to: OrderStatus,
    pin: Option<&str>,
) -> Result<(), ServiceError> {
    let from = order.status;
    if !from.can_transition_to(to) {
        return Err(ServiceError::InvalidTransition { from, to });
    }

    if let Actor::Customer { customer_id } = actor {
        let owns_order = order.customer_id == Some(*customer_id);
        if !(to == OrderStatus::Cancelled && from == OrderStatus::Pending && owns_order) {
            return Err(ServiceError::Forbidden(
                "Customers may only cancel their own pending orders".to_string(),
            ));
        }
    }

    if to == OrderStatus::Delivered {
        if let OrderKind::Express { pin: stored, .. } = &order.kind {
            match pin {
                None => {
                    return Err(ServiceError::InvalidPin(
                        "A PIN is required to collect an express order".to_string(),
                    ))
                }
                // Verbatim comparison: case and whitespace matter.
                Some(supplied) if supplied != stored.as_str() => {
                    return Err(ServiceError::InvalidPin("PIN does not match".to_string()))
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

/// Applies lifecycle transitions to stored orders.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderLifecycleService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Reads, checks and writes inside one transaction. The write only lands
    /// if the order is still in the status that was checked.
    #[instrument(skip(self, pin))]
    pub async fn transition(
        &self,
        order_id: i32,
        actor: Actor,
        to: OrderStatus,
        pin: Option<&str>,
    ) -> Result<Order, ServiceError> {
        let pin = pin.map(str::to_owned);

        let result = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let mut order = load_order(txn, order_id).await?;
                let from = order.status;
                check_transition(&order, &actor, to, pin.as_deref())?;

                let delivered_at = (to == OrderStatus::Delivered).then(Utc::now);
                update_status(txn, order_id, from, to, delivered_at).await?;

                order.status = to;
                if delivered_at.is_some() {
                    order.delivered_at = delivered_at;
                }
                Ok((order, from))
            })
        })
        .await;

        let (order, from) = match result {
            Ok(ok) => ok,
            Err(e) => {
                counter!("bakery_orders.transitions.rejected", 1, "kind" => e.kind().to_string());
                warn!(error = %e, "Transition rejected");
                return Err(e);
            }
        };

        counter!("bakery_orders.transitions.applied", 1, "to" => to.to_string());
        info!(from = %from, "Order status changed");
        self.publish(order_id, from, to);
        Ok(order)
    }

    pub async fn mark_ready(&self, order_id: i32, actor: Actor) -> Result<Order, ServiceError> {
        self.transition(order_id, actor, OrderStatus::Ready, None)
            .await
    }

    /// Express orders need the customer's PIN; scheduled orders ignore it.
    pub async fn deliver(
        &self,
        order_id: i32,
        actor: Actor,
        pin: Option<&str>,
    ) -> Result<Order, ServiceError> {
        self.transition(order_id, actor, OrderStatus::Delivered, pin)
            .await
    }

    pub async fn cancel(&self, order_id: i32, actor: Actor) -> Result<Order, ServiceError> {
        self.transition(order_id, actor, OrderStatus::Cancelled, None)
            .await
    }

    /// Prepared but never collected.
    pub async fn mark_unclaimed(&self, order_id: i32, actor: Actor) -> Result<Order, ServiceError> {
        self.transition(order_id, actor, OrderStatus::Unclaimed, None)
            .await
    }

    fn publish(&self, order_id: i32, from: OrderStatus, to: OrderStatus) {
        let Some(sender) = &self.event_sender else {
            return;
        };
        sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from,
                new_status: to,
            });
        match to {
            OrderStatus::Cancelled => sender.send_or_log(Event::OrderCancelled(order_id)),
            OrderStatus::Delivered => sender.send_or_log(Event::OrderDelivered(order_id)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::PaymentMethod;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn staff() -> Actor {
        Actor::Staff {
            employee_id: Uuid::nil(),
        }
    }

    fn order(status: OrderStatus, kind: OrderKind, customer_id: Option<Uuid>) -> Order {
        Order {
            id: Some(1),
            order_number: 42,
            customer_id,
            status,
            payment_method: PaymentMethod::Cash,
            total_amount: dec!(10),
            pickup_at: None,
            delivered_at: None,
            created_at: Utc::now(),
            kind,
        }
    }

    fn express(status: OrderStatus) -> Order {
        order(
            status,
            OrderKind::Express {
                folio: "EXP-ABCD1234".into(),
                pin: "4821".into(),
            },
            None,
        )
    }

    fn scheduled(status: OrderStatus, customer_id: Uuid) -> Order {
        order(
            status,
            OrderKind::Scheduled { coupon_id: None },
            Some(customer_id),
        )
    }

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Ready)]
    #[case(OrderStatus::Pending, OrderStatus::Delivered)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled)]
    #[case(OrderStatus::Ready, OrderStatus::Delivered)]
    #[case(OrderStatus::Ready, OrderStatus::Cancelled)]
    #[case(OrderStatus::Ready, OrderStatus::Unclaimed)]
    fn staff_may_apply_listed_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        let o = scheduled(from, Uuid::new_v4());
        assert!(check_transition(&o, &staff(), to, None).is_ok());
    }

    #[rstest]
    #[case(OrderStatus::Delivered, OrderStatus::Ready)]
    #[case(OrderStatus::Cancelled, OrderStatus::Pending)]
    #[case(OrderStatus::Unclaimed, OrderStatus::Delivered)]
    #[case(OrderStatus::Ready, OrderStatus::Pending)]
    #[case(OrderStatus::Pending, OrderStatus::Unclaimed)]
    fn unlisted_transitions_are_invalid(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        let o = scheduled(from, Uuid::new_v4());
        assert_matches!(
            check_transition(&o, &staff(), to, None),
            Err(ServiceError::InvalidTransition { from: f, to: t }) if f == from && t == to
        );
    }

    #[test]
    fn customer_can_cancel_own_pending_order_only() {
        let me = Uuid::new_v4();
        let actor = Actor::Customer { customer_id: me };

        assert!(check_transition(
            &scheduled(OrderStatus::Pending, me),
            &actor,
            OrderStatus::Cancelled,
            None
        )
        .is_ok());
        assert_matches!(
            check_transition(
                &scheduled(OrderStatus::Pending, Uuid::new_v4()),
                &actor,
                OrderStatus::Cancelled,
                None
            ),
            Err(ServiceError::Forbidden(_))
        );
        assert_matches!(
            check_transition(
                &scheduled(OrderStatus::Ready, me),
                &actor,
                OrderStatus::Cancelled,
                None
            ),
            Err(ServiceError::Forbidden(_))
        );
        assert_matches!(
            check_transition(
                &scheduled(OrderStatus::Pending, me),
                &actor,
                OrderStatus::Ready,
                None
            ),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[rstest]
    #[case(OrderStatus::Ready)]
    #[case(OrderStatus::Pending)]
    fn express_delivery_requires_matching_pin(#[case] from: OrderStatus) {
        let o = express(from);
        assert_matches!(
            check_transition(&o, &staff(), OrderStatus::Delivered, None),
            Err(ServiceError::InvalidPin(_))
        );
        assert_matches!(
            check_transition(&o, &staff(), OrderStatus::Delivered, Some("0000")),
            Err(ServiceError::InvalidPin(_))
        );
        assert_matches!(
            check_transition(&o, &staff(), OrderStatus::Delivered, Some(" 4821")),
            Err(ServiceError::InvalidPin(_))
        );
        assert!(check_transition(&o, &staff(), OrderStatus::Delivered, Some("4821")).is_ok());
    }

    #[test]
    fn pin_is_not_needed_for_other_express_transitions() {
        let o = express(OrderStatus::Ready);
        assert!(check_transition(&o, &staff(), OrderStatus::Cancelled, None).is_ok());
        assert!(check_transition(&o, &staff(), OrderStatus::Unclaimed, None).is_ok());
    }

    #[test]
    fn invalid_transition_wins_over_pin_check() {
        let o = express(OrderStatus::Delivered);
        assert_matches!(
            check_transition(&o, &staff(), OrderStatus::Delivered, Some("0000")),
            Err(ServiceError::InvalidTransition { .. })
        );
    }
}
