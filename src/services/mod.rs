// Leaf services
pub mod coupons;
pub mod identifiers;

// Order lifecycle transitions
pub mod order_status;

// Cart-to-order orchestration
pub mod checkout;

pub use checkout::{CheckoutKind, CheckoutReceipt, CheckoutRequest, CheckoutService};
pub use coupons::{CouponLookup, CouponPolicy, CouponValidation, CouponValidator};
pub use identifiers::{IdentifierGenerator, OrderNumberStore};
pub use order_status::{Actor, OrderLifecycleService};
