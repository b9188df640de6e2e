//! Stock bookkeeping.
//!
//! Stock only ever moves through a guarded `stock += delta` write; there is
//! no read-modify-write anywhere on this path.

use std::sync::Arc;

use common::ProductId;
use storage::{CacheAsideStore, Order, Product, RecordStore, UnitOfWork};
use tracing::{debug, info};

use crate::error::{CommerceError, Result};

pub struct InventoryLedger<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
}

impl<S: RecordStore> InventoryLedger<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>) -> Self {
        Self { store }
    }

    /// Applies `stock += delta` in its own transaction.
    ///
    /// Fails with `InsufficientStock` if stock would go negative. The product
    /// cache entry is invalidated once the adjustment commits.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<Product> {
        let mut uow = self.store.begin().await?;
        let product = self.apply(&mut uow, product_id, delta).await?;
        uow.commit().await?;
        Ok(product)
    }

    /// Applies `stock += delta` inside an enclosing unit of work.
    pub async fn apply(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        product_id: ProductId,
        delta: i64,
    ) -> Result<Product> {
        if delta == 0 {
            return Err(CommerceError::validation("delta", "must be non-zero"));
        }

        let product = uow.adjust_stock(product_id, delta).await?;
        let direction = if delta < 0 { "decrement" } else { "increment" };
        metrics::counter!("stock_adjustments_total", "direction" => direction).increment(1);
        debug!(
            product_id = %product_id,
            delta,
            stock = product.stock_quantity,
            "Stock adjusted"
        );
        Ok(product)
    }

    /// Decrements stock by `quantity` for checkout.
    pub async fn reserve(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Product> {
        self.apply(uow, product_id, -i64::from(quantity)).await
    }

    /// Returns every line of an order to stock.
    ///
    /// This is the single compensating action for an order that will never
    /// ship; every path that cancels an order runs it in the same unit of
    /// work as the status change.
    pub async fn restore_order_items(&self, uow: &mut UnitOfWork<'_, S>, order: &Order) -> Result<()> {
        for item in &order.items {
            self.apply(uow, item.product_id, i64::from(item.quantity))
                .await?;
            metrics::counter!("stock_restitutions_total").increment(1);
        }
        info!(
            order_id = %order.id,
            lines = order.items.len(),
            "Restored stock for order"
        );
        Ok(())
    }
}
