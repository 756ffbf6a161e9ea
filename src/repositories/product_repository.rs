use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;

use crate::entities::product;
use crate::errors::ServiceError;
use crate::models::cart::ProductSnapshot;
use crate::repositories::Repository;

use super::BaseRepository;

/// Minimal catalog access: enough to seed products and snapshot prices.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn create(&self, name: &str, price: Decimal) -> Result<product::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Product name is required".to_string(),
            ));
        }
        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Product price must not be negative".to_string(),
            ));
        }

        let model = product::ActiveModel {
            name: Set(name.trim().to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.base.get_db())
        .await?;
        Ok(model)
    }

    /// Current price snapshot of an active product.
    pub async fn find_by_id(&self, id: i32) -> Result<ProductSnapshot, ServiceError> {
        product::Entity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .filter(|p| p.is_active)
            .map(|p| p.snapshot())
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }
}

impl Repository for ProductRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
