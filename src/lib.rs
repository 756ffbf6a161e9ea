//! Bakery order engine
//!
//! Creates scheduled and express orders atomically, assigns their
//! identifiers, applies coupon discounts, and governs their status
//! transitions including the PIN-gated express pickup.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod models;
pub mod repositories;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::repositories::{CouponRepository, OrderRepository, ProductRepository};
use crate::services::{CheckoutService, OrderLifecycleService};

/// Everything a front end needs, wired from one connection and config.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Option<Arc<events::EventSender>>,
    pub orders: Arc<OrderRepository>,
    pub products: Arc<ProductRepository>,
    pub coupons: Arc<CouponRepository>,
    pub checkout: CheckoutService,
    pub lifecycle: OrderLifecycleService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<Arc<events::EventSender>>,
    ) -> Self {
        Self {
            orders: Arc::new(
                OrderRepository::new(db.clone())
                    .with_coupon_usage_cap(config.enforce_coupon_usage_cap),
            ),
            products: Arc::new(ProductRepository::new(db.clone())),
            coupons: Arc::new(CouponRepository::new(db.clone())),
            checkout: CheckoutService::from_config(db.clone(), &config, event_sender.clone()),
            lifecycle: OrderLifecycleService::new(db.clone(), event_sender.clone()),
            db,
            config,
            event_sender,
        }
    }
}

pub use errors::{ErrorKind, ServiceError};
