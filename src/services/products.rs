use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Input for adding a catalogue product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    pub price: Decimal,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

/// Read access to the product catalogue. Catalogue management lives elsewhere;
/// ordering only needs current prices.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Current unit price for each id that exists; unknown ids are absent from the map
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn current_prices(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load product prices");
                ServiceError::db_error(e)
            })?;

        Ok(products.into_iter().map(|p| (p.id, p.price)).collect())
    }

    pub async fn list_products(&self) -> Result<Vec<product::Model>, ServiceError> {
        ProductEntity::find()
            .order_by_asc(product::Column::Name)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: NewProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.price.is_sign_negative() {
            return Err(ServiceError::ValidationError(
                "price must not be negative".to_string(),
            ));
        }

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            price: Set(input.price),
            category: Set(input.category),
            image_url: Set(input.image_url),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(ServiceError::db_error)?;

        info!(product_id = %model.id, "Product created");
        Ok(model)
    }

    /// Changes the catalogue price; existing order lines keep the price they captured
    pub async fn update_price(&self, id: Uuid, price: Decimal) -> Result<product::Model, ServiceError> {
        let existing = ProductEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", id)))?;

        let mut active: product::ActiveModel = existing.into();
        active.price = Set(price);
        active
            .update(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
