//! Product catalog: categories and products.

use std::sync::Arc;

use common::{CategoryId, Money, ProductId};
use serde::Deserialize;
use storage::{
    CacheAsideStore, EntityKind, NewCategory, NewProduct, Product, ProductCategory,
    ProductDeletion, RecordStore,
};
use tracing::info;

use crate::error::{CommerceError, Result};

/// A partial update of a product's descriptive fields and price.
///
/// Stock is not updatable here; it only moves through the inventory ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub sku: Option<String>,
    /// `Some(None)` detaches the product from its category.
    pub category_id: Option<Option<CategoryId>>,
}

impl ProductUpdate {
    fn apply(self, product: &mut Product) {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(sku) = self.sku {
            product.sku = sku;
        }
        if let Some(category_id) = self.category_id {
            product.category_id = category_id;
        }
    }
}

fn validate_listing(name: &str, sku: &str, price: Money) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CommerceError::validation("name", "must not be empty"));
    }
    if sku.trim().is_empty() {
        return Err(CommerceError::validation("sku", "must not be empty"));
    }
    if price.is_negative() {
        return Err(CommerceError::validation("price", "must not be negative"));
    }
    Ok(())
}

pub struct ProductCatalog<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
}

impl<S: RecordStore> ProductCatalog<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>) -> Self {
        Self { store }
    }

    /// Creates a category under an existing parent, or at the root.
    #[tracing::instrument(skip(self))]
    pub async fn create_category(
        &self,
        name: &str,
        parent_id: Option<CategoryId>,
    ) -> Result<ProductCategory> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommerceError::validation("name", "must not be empty"));
        }

        let mut uow = self.store.begin().await?;
        let category = uow
            .insert_category(NewCategory {
                name: name.to_string(),
                parent_id,
            })
            .await?;
        uow.commit().await?;
        Ok(category)
    }

    pub async fn category(&self, id: CategoryId) -> Result<ProductCategory> {
        self.store
            .category(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Category, id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_product(&self, product: NewProduct) -> Result<Product> {
        validate_listing(&product.name, &product.sku, product.price)?;
        if product.stock_quantity < 0 {
            return Err(CommerceError::validation(
                "stock_quantity",
                "must not be negative",
            ));
        }

        let mut uow = self.store.begin().await?;
        let product = uow.insert_product(product).await?;
        uow.commit().await?;
        info!(product_id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    pub async fn product(&self, id: ProductId) -> Result<Product> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Product, id))
    }

    pub async fn product_by_sku(&self, sku: &str) -> Result<Product> {
        self.store
            .product_by_sku(sku)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Product, sku))
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        let mut uow = self.store.begin().await?;
        let mut product = uow
            .product(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Product, id))?;

        update.apply(&mut product);
        validate_listing(&product.name, &product.sku, product.price)?;

        let product = uow.update_product(&product).await?;
        uow.commit().await?;
        Ok(product)
    }

    /// Deletes a product and removes it from every cart.
    ///
    /// Rejected while an order that can still ship holds a line for it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<ProductDeletion> {
        let mut uow = self.store.begin().await?;
        let deletion = uow.delete_product(id).await?;
        uow.commit().await?;
        info!(
            product_id = %id,
            carts = deletion.affected_carts.len(),
            "Product deleted"
        );
        Ok(deletion)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn product() -> Product {
        Product {
            id: ProductId::new(1),
            name: "Widget".to_string(),
            description: "Old".to_string(),
            price: Money::from_cents(500),
            stock_quantity: 3,
            sku: "W-1".to_string(),
            category_id: Some(CategoryId::new(2)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn update_touches_only_provided_fields() {
        let mut p = product();
        ProductUpdate {
            price: Some(Money::from_cents(750)),
            category_id: Some(None),
            ..Default::default()
        }
        .apply(&mut p);

        assert_eq!(p.price, Money::from_cents(750));
        assert_eq!(p.category_id, None);
        assert_eq!(p.name, "Widget");
        assert_eq!(p.stock_quantity, 3);
    }

    #[test]
    fn listing_validation() {
        assert!(validate_listing("Widget", "W-1", Money::zero()).is_ok());
        assert!(validate_listing("  ", "W-1", Money::zero()).is_err());
        assert!(validate_listing("Widget", "", Money::zero()).is_err());
        assert!(matches!(
            validate_listing("Widget", "W-1", Money::from_cents(-1)),
            Err(CommerceError::ValidationFailed { field: "price", .. })
        ));
    }
}
