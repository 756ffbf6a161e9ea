use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use validator::{Validate, ValidationError};

use crate::entities::coupon;
use crate::errors::ServiceError;
use crate::repositories::Repository;
use crate::services::coupons::CouponLookup;

use super::BaseRepository;

/// Input for seeding a coupon.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct NewCoupon {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(custom = "validate_percentage")]
    pub discount_percentage: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
}

fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("discount_percentage");
        err.message = Some("discount_percentage must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

fn validate_window(coupon: &NewCoupon) -> Result<(), ValidationError> {
    if coupon.valid_until < coupon.valid_from {
        let mut err = ValidationError::new("valid_until");
        err.message = Some("valid_until must not precede valid_from".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CouponRepository {
    base: BaseRepository,
}

impl CouponRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn create(&self, input: NewCoupon) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        coupon::ActiveModel {
            code: Set(input.code.trim().to_string()),
            discount_percentage: Set(input.discount_percentage),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            usage_count: Set(0),
            usage_limit: Set(input.usage_limit),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.base.get_db())
        .await
        .map_err(|e| ServiceError::from_write(e, "coupon code"))
    }

    pub async fn find_by_id(&self, id: i32) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }
}

#[async_trait]
impl CouponLookup for CouponRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(self.base.get_db())
            .await?)
    }
}

impl Repository for CouponRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
