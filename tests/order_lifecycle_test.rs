//! Lifecycle tests against stored orders: staff transitions, customer
//! cancellation and the PIN-gated express pickup.

mod common;

use assert_matches::assert_matches;
use bakery_orders::{
    events::Event,
    models::{OrderDetails, OrderKind, OrderStatus, PaymentMethod},
    repositories::order_repository::update_status,
    services::{Actor, CheckoutKind, CheckoutRequest},
    ServiceError,
};
use common::{single_item_cart, TestApp};
use rstest::rstest;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn staff() -> Actor {
    Actor::Staff {
        employee_id: Uuid::new_v4(),
    }
}

async fn place_scheduled(app: &TestApp, customer_id: Uuid) -> OrderDetails {
    let product = app.seed_product("Concha", dec!(20)).await;
    app.state
        .checkout
        .checkout(CheckoutRequest {
            cart: single_item_cart(product, 1),
            kind: CheckoutKind::Scheduled {
                customer_id,
                coupon_code: None,
                pickup_at: None,
            },
            payment_method: PaymentMethod::Cash,
        })
        .await
        .unwrap()
        .details
}

async fn place_express(app: &TestApp) -> (i32, String) {
    let product = app.seed_product("Bolillo", dec!(15)).await;
    let details = app
        .state
        .checkout
        .checkout(CheckoutRequest {
            cart: single_item_cart(product, 2),
            kind: CheckoutKind::Express {
                customer_id: None,
                pickup_at: None,
            },
            payment_method: PaymentMethod::Cash,
        })
        .await
        .unwrap()
        .details;
    let pin = match details.order.kind {
        OrderKind::Express { pin, .. } => pin,
        OrderKind::Scheduled { .. } => unreachable!("express checkout"),
    };
    (details.order.id.unwrap(), pin)
}

async fn status_of(app: &TestApp, order_id: i32) -> OrderStatus {
    app.state.orders.find_by_id(order_id).await.unwrap().order.status
}

#[tokio::test]
async fn express_pickup_requires_the_exact_pin() {
    let mut app = TestApp::new().await;
    let (order_id, pin) = place_express(&app).await;
    let wrong = if pin == "0000" { "1111" } else { "0000" };

    app.state.lifecycle.mark_ready(order_id, staff()).await.unwrap();

    let err = app
        .state
        .lifecycle
        .deliver(order_id, staff(), Some(wrong))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidPin(_));
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Ready);

    let err = app
        .state
        .lifecycle
        .deliver(order_id, staff(), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidPin(_));
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Ready);

    let delivered = app
        .state
        .lifecycle
        .deliver(order_id, staff(), Some(&pin))
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    let stored = app.state.orders.find_by_id(order_id).await.unwrap().order;
    assert_eq!(stored.status, OrderStatus::Delivered);
    assert!(stored.delivered_at.is_some());

    let events = app.drain_events();
    assert!(events.contains(&Event::OrderDelivered(order_id)));
    assert!(events.contains(&Event::OrderStatusChanged {
        order_id,
        old_status: OrderStatus::Ready,
        new_status: OrderStatus::Delivered,
    }));
}

#[tokio::test]
async fn scheduled_order_is_delivered_without_pin() {
    let app = TestApp::new().await;
    let details = place_scheduled(&app, Uuid::new_v4()).await;
    let order_id = details.order.id.unwrap();

    let delivered = app
        .state
        .lifecycle
        .deliver(order_id, staff(), None)
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn customer_cancels_own_pending_order() {
    let mut app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let order_id = place_scheduled(&app, customer).await.order.id.unwrap();
    app.drain_events();

    let cancelled = app
        .state
        .lifecycle
        .cancel(order_id, Actor::Customer { customer_id: customer })
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(app.drain_events().contains(&Event::OrderCancelled(order_id)));
}

#[tokio::test]
async fn customer_cannot_cancel_someone_elses_or_ready_order() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let order_id = place_scheduled(&app, owner).await.order.id.unwrap();

    let stranger = Actor::Customer {
        customer_id: Uuid::new_v4(),
    };
    assert_matches!(
        app.state.lifecycle.cancel(order_id, stranger).await,
        Err(ServiceError::Forbidden(_))
    );

    app.state.lifecycle.mark_ready(order_id, staff()).await.unwrap();
    assert_matches!(
        app.state
            .lifecycle
            .cancel(order_id, Actor::Customer { customer_id: owner })
            .await,
        Err(ServiceError::Forbidden(_))
    );
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Ready);
}

#[rstest]
#[case(OrderStatus::Delivered)]
#[case(OrderStatus::Cancelled)]
#[case(OrderStatus::Unclaimed)]
#[tokio::test]
async fn terminal_orders_reject_every_transition(#[case] terminal: OrderStatus) {
    let app = TestApp::new().await;
    let order_id = place_scheduled(&app, Uuid::new_v4()).await.order.id.unwrap();

    app.state.lifecycle.mark_ready(order_id, staff()).await.unwrap();
    app.state
        .lifecycle
        .transition(order_id, staff(), terminal, None)
        .await
        .unwrap();

    for next in [
        OrderStatus::Pending,
        OrderStatus::Ready,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Unclaimed,
    ] {
        let err = app
            .state
            .lifecycle
            .transition(order_id, staff(), next, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidTransition { from, .. } if from == terminal);
        assert_eq!(status_of(&app, order_id).await, terminal);
    }
}

#[tokio::test]
async fn unclaimed_requires_ready() {
    let app = TestApp::new().await;
    let order_id = place_scheduled(&app, Uuid::new_v4()).await.order.id.unwrap();

    assert_matches!(
        app.state.lifecycle.mark_unclaimed(order_id, staff()).await,
        Err(ServiceError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Unclaimed
        })
    );

    app.state.lifecycle.mark_ready(order_id, staff()).await.unwrap();
    let unclaimed = app
        .state
        .lifecycle
        .mark_unclaimed(order_id, staff())
        .await
        .unwrap();
    assert_eq!(unclaimed.status, OrderStatus::Unclaimed);
    assert!(unclaimed.delivered_at.is_none());
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;
    assert_matches!(
        app.state.lifecycle.mark_ready(9_999, staff()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.state.orders.find_by_id(9_999).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn stale_status_write_is_rejected_and_leaves_row_untouched() {
    let app = TestApp::new().await;
    let order_id = place_scheduled(&app, Uuid::new_v4()).await.order.id.unwrap();
    app.state.lifecycle.mark_ready(order_id, staff()).await.unwrap();

    // A writer that still believes the order is pending.
    let result = update_status(
        app.state.db.as_ref(),
        order_id,
        OrderStatus::Pending,
        OrderStatus::Cancelled,
        None,
    )
    .await;

    assert_matches!(result, Err(ServiceError::ConcurrentModification(id)) if id == order_id);
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Ready);
}
