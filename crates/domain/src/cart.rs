//! Cart mutation and totals.
//!
//! Cart lines reference live products by id and are joined at read time,
//! so totals always reflect current prices.

use std::sync::Arc;

use common::{CartId, CartItemId, Money, ProductId, UserId};
use futures_util::future::try_join_all;
use serde::Serialize;
use storage::{
    Cart, CartItem, CartSnapshot, CacheAsideStore, EntityKind, Product, RecordStore, StoreError,
    UnitOfWork,
};
use tracing::{debug, warn};

use crate::error::{CommerceError, Result};

/// A cart line joined with its live product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item_id: CartItemId,
    pub product: Product,
    pub quantity: u32,
}

impl CartLine {
    /// `price * quantity`, failing if the amount is not representable.
    pub fn line_total(&self) -> Result<Money> {
        line_total(self.product.price, self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
}

impl CartView {
    pub fn id(&self) -> CartId {
        self.cart.id
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of `price * quantity` at current prices.
    pub fn total(&self) -> Result<Money> {
        let totals = self
            .lines
            .iter()
            .map(CartLine::line_total)
            .collect::<Result<Vec<_>>>()?;
        Money::checked_sum(totals)
            .ok_or_else(|| CommerceError::validation("price", "cart total exceeds the representable amount"))
    }
}

/// `price * quantity` with overflow reported as a validation failure.
pub fn line_total(price: Money, quantity: u32) -> Result<Money> {
    price
        .checked_multiply(quantity)
        .ok_or_else(|| CommerceError::validation("quantity", "line total exceeds the representable amount"))
}

fn positive_quantity(quantity: i64) -> Result<u32> {
    if quantity <= 0 {
        return Err(CommerceError::validation("quantity", "must be greater than zero"));
    }
    u32::try_from(quantity)
        .map_err(|_| CommerceError::validation("quantity", "exceeds the maximum line quantity"))
}

fn owned_item(items: &[CartItem], cart_id: CartId, item_id: CartItemId) -> Result<CartItem> {
    items
        .iter()
        .find(|item| item.id == item_id && item.cart_id == cart_id)
        .cloned()
        .ok_or_else(|| CommerceError::not_found(EntityKind::CartItem, item_id))
}

pub struct CartAggregate<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
}

impl<S: RecordStore> CartAggregate<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>) -> Self {
        Self { store }
    }

    /// Returns the user's cart, creating an empty one on first access.
    #[tracing::instrument(skip(self))]
    pub async fn cart_for_user(&self, user_id: UserId) -> Result<CartView> {
        if let Some(view) = self.find_cart(user_id).await? {
            return Ok(view);
        }
        let cart = self.create_cart(user_id).await?;
        Ok(CartView {
            cart,
            lines: Vec::new(),
        })
    }

    /// Returns the user's cart without creating one.
    pub async fn find_cart(&self, user_id: UserId) -> Result<Option<CartView>> {
        match self.store.cart_for_user(user_id).await? {
            Some(snapshot) => self.join(snapshot).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn cart(&self, cart_id: CartId) -> Result<CartView> {
        let snapshot = self.snapshot(cart_id).await?;
        self.join(snapshot).await
    }

    /// Adds `quantity` units of a product to the user's cart, merging with
    /// an existing line for the same product.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartView> {
        let quantity = positive_quantity(quantity)?;
        let cart = self.cart_for_user(user_id).await?.cart;

        let mut uow = self.store.begin().await?;
        let product = uow
            .product(product_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Product, product_id))?;
        let already = uow
            .cart_items(cart.id)
            .await?
            .iter()
            .find(|item| item.product_id == product_id)
            .map_or(0, |item| item.quantity);
        let merged = i64::from(already) + i64::from(quantity);
        if product.stock_quantity < merged {
            return Err(CommerceError::InsufficientStock { product_id });
        }
        line_total(product.price, positive_quantity(merged)?)?;

        uow.upsert_cart_item(&cart, product_id, quantity).await?;
        uow.commit().await?;
        debug!(cart_id = %cart.id, product_id = %product_id, quantity = merged, "Cart line added");

        self.cart(cart.id).await
    }

    /// Overwrites a line's quantity. A non-positive quantity removes the line.
    #[tracing::instrument(skip(self))]
    pub async fn update_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i64,
    ) -> Result<CartView> {
        if quantity <= 0 {
            return self.remove_item(cart_id, item_id).await;
        }
        let quantity = positive_quantity(quantity)?;
        let cart = self.snapshot(cart_id).await?.cart;

        let mut uow = self.store.begin().await?;
        let item = owned_item(&uow.cart_items(cart_id).await?, cart_id, item_id)?;
        let product = uow
            .product(item.product_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Product, item.product_id))?;
        if product.stock_quantity < i64::from(quantity) {
            return Err(CommerceError::InsufficientStock {
                product_id: product.id,
            });
        }
        line_total(product.price, quantity)?;

        uow.set_cart_item_quantity(&cart, item_id, quantity).await?;
        uow.commit().await?;

        self.cart(cart_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<CartView> {
        let cart = self.snapshot(cart_id).await?.cart;

        let mut uow = self.store.begin().await?;
        owned_item(&uow.cart_items(cart_id).await?, cart_id, item_id)?;
        uow.delete_cart_item(&cart, item_id).await?;
        uow.commit().await?;

        self.cart(cart_id).await
    }

    /// Sum of `price * quantity` over current lines at live prices.
    pub async fn get_total(&self, cart_id: CartId) -> Result<Money> {
        self.cart(cart_id).await?.total()
    }

    /// Deletes every line of the cart.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, cart_id: CartId) -> Result<u64> {
        let cart = self.snapshot(cart_id).await?.cart;
        let mut uow = self.store.begin().await?;
        let removed = self.clear_in(&mut uow, &cart).await?;
        uow.commit().await?;
        Ok(removed)
    }

    /// Deletes every line of the cart inside an enclosing unit of work.
    pub async fn clear_in(&self, uow: &mut UnitOfWork<'_, S>, cart: &Cart) -> Result<u64> {
        Ok(uow.clear_cart(cart).await?)
    }

    async fn snapshot(&self, cart_id: CartId) -> Result<CartSnapshot> {
        self.store
            .cart(cart_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Cart, cart_id))
    }

    async fn create_cart(&self, user_id: UserId) -> Result<Cart> {
        let mut uow = self.store.begin().await?;
        match uow.insert_cart(user_id).await {
            Ok(cart) => {
                uow.commit().await?;
                debug!(user_id = %user_id, cart_id = %cart.id, "Cart created");
                Ok(cart)
            }
            // Lost a race with a concurrent first access.
            Err(StoreError::Duplicate { .. }) => {
                drop(uow);
                self.store
                    .store()
                    .cart_for_user(user_id)
                    .await?
                    .ok_or_else(|| CommerceError::not_found(EntityKind::Cart, user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn join(&self, snapshot: CartSnapshot) -> Result<CartView> {
        let products = try_join_all(
            snapshot
                .items
                .iter()
                .map(|item| self.store.product(item.product_id)),
        )
        .await?;

        let mut lines = Vec::with_capacity(snapshot.items.len());
        for (item, product) in snapshot.items.into_iter().zip(products) {
            match product {
                Some(product) => lines.push(CartLine {
                    item_id: item.id,
                    product,
                    quantity: item.quantity,
                }),
                None => warn!(
                    cart_id = %snapshot.cart.id,
                    product_id = %item.product_id,
                    "Skipping cart line for missing product"
                ),
            }
        }

        Ok(CartView {
            cart: snapshot.cart,
            lines,
        })
    }
}
