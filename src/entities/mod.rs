pub mod coupon;
pub mod express_order;
pub mod order;
pub mod order_line_item;
pub mod product;
pub mod scheduled_order;
