//! Cart-to-order conversion and order status changes.

use std::sync::Arc;
use std::time::Instant;

use common::{Money, OrderId, OrderStatus, UserId};
use domain::{
    CartAggregate, CommerceError, InventoryLedger, Result, ensure_transition, line_total,
};
use storage::{CacheAsideStore, EntityKind, NewOrder, Order, OrderItem, RecordStore, UnitOfWork};
use tracing::{debug, info};

use crate::notifier::{EventNotifier, Notification};

/// Moves an order to `to` inside `uow`, restoring stock when the target is
/// `Cancelled`. Every cancellation path goes through here.
///
/// With `idempotent` set, an order already in the target status is returned
/// unchanged instead of being rejected.
pub(crate) async fn apply_order_transition<S: RecordStore>(
    inventory: &InventoryLedger<S>,
    uow: &mut UnitOfWork<'_, S>,
    order: &Order,
    to: OrderStatus,
    idempotent: bool,
) -> Result<Order> {
    if idempotent && order.status == to {
        return Ok(order.clone());
    }
    ensure_transition(order.status, to)?;

    let updated = uow.update_order_status(order.id, to).await?;
    if to == OrderStatus::Cancelled {
        inventory.restore_order_items(uow, order).await?;
        metrics::counter!("orders_cancelled_total").increment(1);
    }
    info!(order_id = %order.id, from = %order.status, to = %to, "Order status changed");
    Ok(updated)
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CommerceError::validation(field, "must not be empty"));
    }
    Ok(value.to_string())
}

pub struct OrderFulfillmentWorkflow<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
    carts: CartAggregate<S>,
    inventory: InventoryLedger<S>,
    notifier: Arc<dyn EventNotifier>,
}

impl<S: RecordStore> OrderFulfillmentWorkflow<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self {
            carts: CartAggregate::new(store.clone()),
            inventory: InventoryLedger::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Converts the user's cart into a `Pending` order.
    ///
    /// Stock decrements, the order insert and the cart clear commit together
    /// or not at all. The `order-created` notification is sent after commit.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        shipping_address: &str,
        billing_address: &str,
    ) -> Result<Order> {
        let started = Instant::now();
        let shipping_address = required("shipping_address", shipping_address)?;
        let billing_address = required("billing_address", billing_address)?;

        let cart = match self.carts.find_cart(user_id).await? {
            Some(view) if !view.is_empty() => view,
            _ => return Err(CommerceError::EmptyCart),
        };
        let cart_total = cart.total()?;

        let mut uow = self.store.begin().await?;
        let mut items = uow.cart_items(cart.id()).await?;
        if items.is_empty() {
            return Err(CommerceError::EmptyCart);
        }
        // Lock products in a stable order.
        items.sort_by_key(|item| item.product_id);

        let mut lines = Vec::with_capacity(items.len());
        let mut line_totals = Vec::with_capacity(items.len());
        for item in &items {
            let product = uow
                .product(item.product_id)
                .await?
                .ok_or_else(|| CommerceError::not_found(EntityKind::Product, item.product_id))?;
            if product.stock_quantity < i64::from(item.quantity) {
                return Err(CommerceError::InsufficientStock {
                    product_id: product.id,
                });
            }
            line_totals.push(line_total(product.price, item.quantity)?);
            lines.push(OrderItem::snapshot(&product, item.quantity));
            self.inventory
                .reserve(&mut uow, product.id, item.quantity)
                .await?;
        }

        let total_amount = Money::checked_sum(line_totals).ok_or_else(|| {
            CommerceError::validation("price", "order total exceeds the representable amount")
        })?;
        if total_amount != cart_total {
            debug!(%cart_total, %total_amount, "Cart total moved before checkout locked it");
        }

        let order = uow
            .insert_order(NewOrder {
                user_id,
                items: lines,
                total_amount,
                shipping_address,
                billing_address,
            })
            .await?;
        self.carts.clear_in(&mut uow, &cart.cart).await?;
        uow.commit().await?;

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(order_id = %order.id, total = %order.total_amount, "Order created");

        self.notifier.notify(Notification::order_created(&order));
        Ok(order)
    }

    /// Cancels an order that has not shipped and returns its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    /// Applies a validated status change. Cancelling restores stock.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        self.transition(order_id, status).await
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Order, order_id))
    }

    /// A user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    async fn transition(&self, order_id: OrderId, to: OrderStatus) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Order, order_id))?;

        let updated = apply_order_transition(&self.inventory, &mut uow, &order, to, false).await?;
        uow.commit().await?;

        self.notifier.notify(Notification::order_updated(&updated));
        Ok(updated)
    }
}
