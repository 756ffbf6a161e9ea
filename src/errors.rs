use sea_orm::error::{DbErr, SqlErr};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::models::order::OrderStatus;

/// Coarse classification of a [`ServiceError`], used by callers to decide
/// whether to re-prompt the user, retry, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    InvalidTransition,
    Conflict,
    Persistence,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// PIN missing or not matching the stored value.
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification of order {0}")]
    ConcurrentModification(i32),

    /// The coupon's usage limit was reached before the order committed.
    #[error("Coupon {0} has no uses left")]
    CouponExhausted(i32),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Maps unique-constraint violations to [`ServiceError::Conflict`] and
    /// every other database failure to [`ServiceError::DatabaseError`].
    pub fn from_write(error: DbErr, context: &str) -> Self {
        match error.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                ServiceError::Conflict(format!("{}: {}", context, detail))
            }
            _ => ServiceError::DatabaseError(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidPin(_) | Self::Forbidden(_) => ErrorKind::Authorization,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict(_) | Self::ConcurrentModification(_) | Self::CouponExhausted(_) => {
                ErrorKind::Conflict
            }
            Self::DatabaseError(_) => ErrorKind::Persistence,
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Only identifier collisions are worth retrying; a lost status update
    /// must be re-read by the caller instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Message suitable for showing to an operator.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn user_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ServiceError::InvalidPin("x".into()).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: OrderStatus::Delivered,
                to: OrderStatus::Ready,
            }
            .kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("connection reset".into())).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(ErrorKind::InvalidTransition.to_string(), "invalid_transition");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(ServiceError::Conflict("order_number".into()).is_retryable());
        assert!(!ServiceError::ConcurrentModification(7).is_retryable());
        assert!(!ServiceError::CouponExhausted(3).is_retryable());
        assert!(!ServiceError::InvalidPin("mismatch".into()).is_retryable());
    }

    #[test]
    fn user_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("disk I/O error at page 42".into())).user_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("missing extension row".into()).user_message(),
            "Internal error"
        );
        assert_eq!(
            ServiceError::NotFound("Order 9 not found".into()).user_message(),
            "Not found: Order 9 not found"
        );
    }

    #[test]
    fn non_unique_write_errors_stay_database_errors() {
        let err = ServiceError::from_write(DbErr::Custom("boom".into()), "insert order");
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = ServiceError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Ready,
        };
        assert_eq!(err.to_string(), "Invalid transition from Cancelled to Ready");
    }
}
