use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::models::order::{OrderStatus, OrderType};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Publishes without waiting for channel capacity. Used after a commit:
    /// a full or closed channel drops the event with a warning and the
    /// caller still gets its result.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                counter!("bakery_orders.events.dropped", 1, "reason" => "full");
                warn!(?event, "Event channel full, dropping domain event");
            }
            Err(TrySendError::Closed(event)) => {
                counter!("bakery_orders.events.dropped", 1, "reason" => "closed");
                warn!(?event, "Event channel closed, dropping domain event");
            }
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Domain events published after a transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i32,
        order_number: i32,
        kind: OrderType,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(i32),
    OrderDelivered(i32),
    CouponRedeemed {
        coupon_id: i32,
        order_id: i32,
    },
}

/// Drains the receiver until every sender is dropped, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                kind,
            } => {
                info!(order_id, order_number, kind = %kind, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, old_status = %old_status, new_status = %new_status, "Order status changed");
            }
            Event::OrderCancelled(order_id) => info!(order_id, "Order cancelled"),
            Event::OrderDelivered(order_id) => info!(order_id, "Order delivered"),
            Event::CouponRedeemed {
                coupon_id,
                order_id,
            } => {
                info!(coupon_id, order_id, "Coupon redeemed");
            }
        }
    }

    info!("Event processing loop stopped");
}
