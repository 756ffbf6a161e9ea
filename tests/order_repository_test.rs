//! Atomicity and uniqueness of the transactional order writer.

mod common;

use assert_matches::assert_matches;
use bakery_orders::{
    entities::{express_order, order, order_line_item, scheduled_order},
    models::{LineItem, Order, OrderKind, OrderStatus, PaymentMethod},
    repositories::OrderRepository,
    ServiceError,
};
use chrono::Utc;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use uuid::Uuid;

fn new_order(order_number: i32, kind: OrderKind) -> Order {
    let customer_id = match kind {
        OrderKind::Scheduled { .. } => Some(Uuid::new_v4()),
        OrderKind::Express { .. } => None,
    };
    Order {
        id: None,
        order_number,
        customer_id,
        status: OrderStatus::Pending,
        payment_method: PaymentMethod::Cash,
        total_amount: dec!(20),
        pickup_at: None,
        delivered_at: None,
        created_at: Utc::now(),
        kind,
    }
}

fn express_kind(folio: &str) -> OrderKind {
    OrderKind::Express {
        folio: folio.to_string(),
        pin: "4821".to_string(),
    }
}

async fn row_counts(app: &TestApp) -> (u64, u64, u64, u64) {
    let db = app.state.db.as_ref();
    (
        order::Entity::find().count(db).await.unwrap(),
        scheduled_order::Entity::find().count(db).await.unwrap(),
        express_order::Entity::find().count(db).await.unwrap(),
        order_line_item::Entity::find().count(db).await.unwrap(),
    )
}

#[tokio::test]
async fn ids_are_attached_to_order_and_items() {
    let app = TestApp::new().await;
    let product = app.seed_product("Concha", dec!(10)).await;

    let details = app
        .state
        .orders
        .insert_express_order(
            new_order(100_001, express_kind("EXP-AAAA0001")),
            vec![
                LineItem::new(product.id, 1, product.price, None),
                LineItem::new(product.id, 1, product.price, Some("tostado".into())),
            ],
        )
        .await
        .unwrap();

    let id = details.order.id.expect("generated id");
    assert!(details.line_items.iter().all(|i| i.order_id == Some(id)));
    assert_eq!(row_counts(&app).await, (1, 0, 1, 2));
}

#[tokio::test]
async fn failing_line_item_rolls_back_header_and_variant_row() {
    let app = TestApp::new().await;
    let coupon = app.seed_coupon("PAN10", dec!(10), None).await;

    // Product 4242 does not exist, so the line-item insert hits the foreign key.
    let result = app
        .state
        .orders
        .insert_scheduled_order(
            new_order(100_002, OrderKind::Scheduled { coupon_id: Some(coupon.id) }),
            vec![LineItem::new(4242, 1, dec!(10), None)],
        )
        .await;

    assert_matches!(result, Err(ServiceError::DatabaseError(_)));
    assert_eq!(row_counts(&app).await, (0, 0, 0, 0));
    assert!(app
        .state
        .orders
        .find_by_order_number(100_002)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        app.state.coupons.find_by_id(coupon.id).await.unwrap().usage_count,
        0
    );
}

#[tokio::test]
async fn duplicate_folio_is_a_conflict_and_leaves_no_header() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bolillo", dec!(5)).await;
    let items = vec![LineItem::new(product.id, 4, product.price, None)];

    app.state
        .orders
        .insert_express_order(new_order(100_003, express_kind("EXP-DUPLICAT")), items.clone())
        .await
        .unwrap();

    let err = app
        .state
        .orders
        .insert_express_order(new_order(100_004, express_kind("EXP-DUPLICAT")), items)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Conflict(_));
    assert!(err.is_retryable());
    assert_eq!(row_counts(&app).await, (1, 0, 1, 1));
    assert!(app
        .state
        .orders
        .find_by_order_number(100_004)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_order_number_is_a_conflict() {
    let app = TestApp::new().await;
    let product = app.seed_product("Dona", dec!(7)).await;
    let items = vec![LineItem::new(product.id, 1, product.price, None)];

    app.state
        .orders
        .insert_scheduled_order(
            new_order(123_456, OrderKind::Scheduled { coupon_id: None }),
            items.clone(),
        )
        .await
        .unwrap();

    let result = app
        .state
        .orders
        .insert_scheduled_order(
            new_order(123_456, OrderKind::Scheduled { coupon_id: None }),
            items,
        )
        .await;

    assert_matches!(result, Err(ServiceError::Conflict(_)));
    assert_eq!(row_counts(&app).await, (1, 1, 0, 1));
}

#[tokio::test]
async fn invalid_orders_are_rejected_before_persistence() {
    let app = TestApp::new().await;
    let product = app.seed_product("Oreja", dec!(9)).await;
    let item = LineItem::new(product.id, 1, product.price, None);

    // Variant mismatch.
    assert_matches!(
        app.state
            .orders
            .insert_express_order(
                new_order(1, OrderKind::Scheduled { coupon_id: None }),
                vec![item.clone()],
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );

    // No line items.
    assert_matches!(
        app.state
            .orders
            .insert_order(new_order(2, express_kind("EXP-EMPTY000")), vec![])
            .await,
        Err(ServiceError::ValidationError(_))
    );

    // Scheduled order without a customer.
    let mut anonymous = new_order(3, OrderKind::Scheduled { coupon_id: None });
    anonymous.customer_id = None;
    assert_matches!(
        app.state.orders.insert_order(anonymous, vec![item]).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_eq!(row_counts(&app).await, (0, 0, 0, 0));
}

#[tokio::test]
async fn redeeming_an_exhausted_coupon_rolls_back_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cuerno", dec!(6)).await;
    let coupon = app.seed_coupon("ONCE", dec!(50), Some(1)).await;
    let items = vec![LineItem::new(product.id, 1, product.price, None)];
    let with_coupon = OrderKind::Scheduled {
        coupon_id: Some(coupon.id),
    };

    app.state
        .orders
        .insert_scheduled_order(new_order(200_001, with_coupon.clone()), items.clone())
        .await
        .unwrap();

    let err = app
        .state
        .orders
        .insert_scheduled_order(new_order(200_002, with_coupon), items)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::CouponExhausted(id) if id == coupon.id);
    assert!(!err.is_retryable());
    assert_eq!(row_counts(&app).await, (1, 1, 0, 1));
    assert_eq!(
        app.state.coupons.find_by_id(coupon.id).await.unwrap().usage_count,
        1
    );
}

#[tokio::test]
async fn usage_cap_can_be_switched_off() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cuerno", dec!(6)).await;
    let coupon = app.seed_coupon("ONCE", dec!(50), Some(1)).await;
    let orders = OrderRepository::new(app.state.db.clone()).with_coupon_usage_cap(false);
    let items = vec![LineItem::new(product.id, 1, product.price, None)];

    for number in [200_003, 200_004] {
        orders
            .insert_scheduled_order(
                new_order(
                    number,
                    OrderKind::Scheduled {
                        coupon_id: Some(coupon.id),
                    },
                ),
                items.clone(),
            )
            .await
            .unwrap();
    }

    assert_eq!(
        app.state.coupons.find_by_id(coupon.id).await.unwrap().usage_count,
        2
    );
}
