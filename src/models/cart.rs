use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::order::LineItem;

/// Product data the checkout needs, read from the catalog when the cart is filled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: i32,
    pub name: String,
    pub price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct CartLine {
    pub product: ProductSnapshot,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(length(max = 500, message = "Notes are limited to 500 characters"))]
    pub note: Option<String>,
}

impl CartLine {
    pub fn subtotal(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// Transient selection of products; lives only for the duration of a checkout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Cart {
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product; a repeated product with the same note merges quantities.
    pub fn add(&mut self, product: ProductSnapshot, quantity: i32, note: Option<String>) {
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.product.id == product.id && l.note == note)
        {
            line.quantity += quantity;
            return;
        }
        self.lines.push(CartLine {
            product,
            quantity,
            note,
        });
    }

    pub fn with_item(mut self, product: ProductSnapshot, quantity: i32) -> Self {
        self.add(product, quantity, None);
        self
    }

    pub fn with_noted_item(mut self, product: ProductSnapshot, quantity: i32, note: &str) -> Self {
        self.add(product, quantity, Some(note.to_string()));
        self
    }

    /// Validates the cart and every line in it.
    pub fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.lines {
            line.validate()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of quantity x current price over all lines.
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// Freezes the cart into line items, capturing each product's current price.
    pub fn to_line_items(&self) -> Vec<LineItem> {
        self.lines
            .iter()
            .map(|line| {
                LineItem::new(
                    line.product.id,
                    line.quantity,
                    line.product.price,
                    line.note.clone(),
                )
            })
            .collect()
    }
}
