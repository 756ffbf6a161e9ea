#![allow(dead_code)]

use std::sync::Arc;

use bakery_orders::{
    config::AppConfig,
    db,
    entities::coupon,
    events::{self, Event},
    models::{Cart, ProductSnapshot},
    repositories::NewCoupon,
    AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Application state backed by a fresh in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (sender, events) = events::channel(cfg.event_channel_capacity);
        let state = AppState::new(Arc::new(pool), cfg, Some(Arc::new(sender)));
        Self { state, events }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> ProductSnapshot {
        self.state
            .products
            .create(name, price)
            .await
            .expect("failed to seed product")
            .snapshot()
    }

    /// Coupon valid from yesterday until next week.
    pub async fn seed_coupon(
        &self,
        code: &str,
        percentage: Decimal,
        usage_limit: Option<i32>,
    ) -> coupon::Model {
        let now = Utc::now();
        self.state
            .coupons
            .create(NewCoupon {
                code: code.to_string(),
                discount_percentage: percentage,
                valid_from: now - Duration::days(1),
                valid_until: now + Duration::days(7),
                usage_limit,
            })
            .await
            .expect("failed to seed coupon")
    }

    /// Events published so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg
}

pub fn single_item_cart(product: ProductSnapshot, quantity: i32) -> Cart {
    Cart::new().with_item(product, quantity)
}
