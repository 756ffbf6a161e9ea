use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::entities::coupon;
use crate::errors::ServiceError;

/// Source of coupon rows, keyed by code.
#[async_trait]
pub trait CouponLookup: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError>;
}

/// Outcome of checking a coupon code against a subtotal. An unusable coupon
/// is a normal negative result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    pub message: String,
    pub discount_amount: Decimal,
    pub coupon_id: Option<i32>,
}

impl CouponValidation {
    pub(crate) fn rejected(message: &str, coupon_id: Option<i32>) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            discount_amount: Decimal::ZERO,
            coupon_id,
        }
    }
}

/// Which of the coupon's stored limits are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponPolicy {
    pub enforce_window: bool,
    pub enforce_usage_cap: bool,
}

impl Default for CouponPolicy {
    fn default() -> Self {
        Self {
            enforce_window: true,
            enforce_usage_cap: true,
        }
    }
}

impl From<&AppConfig> for CouponPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            enforce_window: cfg.enforce_coupon_window,
            enforce_usage_cap: cfg.enforce_coupon_usage_cap,
        }
    }
}

/// `subtotal * percentage / 100`, unrounded.
pub fn discount_for(subtotal: Decimal, percentage: Decimal) -> Decimal {
    subtotal * percentage / Decimal::ONE_HUNDRED
}

#[derive(Clone)]
pub struct CouponValidator {
    lookup: Arc<dyn CouponLookup>,
    policy: CouponPolicy,
}

impl CouponValidator {
    pub fn new(lookup: Arc<dyn CouponLookup>) -> Self {
        Self::with_policy(lookup, CouponPolicy::default())
    }

    pub fn with_policy(lookup: Arc<dyn CouponLookup>, policy: CouponPolicy) -> Self {
        Self { lookup, policy }
    }

    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponValidation, ServiceError> {
        self.validate_at(code, subtotal, Utc::now()).await
    }

    /// Validates as of `now`; the window check uses this instant.
    #[instrument(skip(self))]
    pub async fn validate_at(
        &self,
        code: &str,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponValidation, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }
        if subtotal <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Subtotal must be positive, got {}",
                subtotal
            )));
        }

        let coupon = match self.lookup.find_by_code(code).await? {
            Some(coupon) => coupon,
            None => {
                debug!("Coupon not found");
                return Ok(CouponValidation::rejected("coupon does not exist", None));
            }
        };

        if self.policy.enforce_window && !coupon.is_within_window(now) {
            return Ok(CouponValidation::rejected(
                "coupon is not valid at this time",
                Some(coupon.id),
            ));
        }
        if self.policy.enforce_usage_cap && coupon.is_exhausted() {
            return Ok(CouponValidation::rejected(
                "coupon usage limit reached",
                Some(coupon.id),
            ));
        }

        Ok(CouponValidation {
            valid: true,
            message: "coupon applied".to_string(),
            discount_amount: discount_for(subtotal, coupon.discount_percentage),
            coupon_id: Some(coupon.id),
        })
    }
}
