pub mod cart;
pub mod order;

pub use cart::{Cart, CartLine, ProductSnapshot};
pub use order::{
    LineItem, Order, OrderDetails, OrderKind, OrderStatus, OrderType, PaymentMethod,
};
