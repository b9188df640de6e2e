use async_trait::async_trait;
use common::{
    CartId, CartItemId, CategoryId, OrderId, OrderStatus, PaymentId, ProductId, UserId,
};

use crate::Result;
use crate::records::{
    Cart, CartItem, NewCategory, NewOrder, NewPayment, NewProduct, NewUser, Order, Payment,
    Product, ProductCategory, ProductDeletion, User,
};

/// Core trait for durable record store implementations.
///
/// Reads on the store itself observe committed state only. All writes go
/// through a [`Transaction`] obtained from [`RecordStore::begin`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// The transaction type handed out by [`RecordStore::begin`].
    type Tx: Transaction;

    /// Starts a transaction. Dropping it without committing rolls it back.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>>;

    async fn category(&self, id: CategoryId) -> Result<Option<ProductCategory>>;

    async fn user(&self, id: UserId) -> Result<Option<User>>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn cart(&self, id: CartId) -> Result<Option<Cart>>;

    async fn cart_for_user(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Returns the lines of a cart in insertion order.
    async fn cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns a user's orders, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;
}

/// A unit of atomic work against the record store.
///
/// Reads inside a transaction lock the rows they return until the
/// transaction ends, so a read-validate-write sequence cannot interleave
/// with a concurrent writer.
#[async_trait]
pub trait Transaction: Send {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>>;

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product>;

    /// Overwrites descriptive fields and price. Stock is left untouched;
    /// it only changes through [`Transaction::adjust_stock`].
    async fn update_product(&mut self, product: &Product) -> Result<Product>;

    /// Deletes a product and removes it from every cart.
    ///
    /// Fails with `Referenced` while a non-terminal order holds a line for it.
    async fn delete_product(&mut self, id: ProductId) -> Result<ProductDeletion>;

    /// Applies `stock += delta` as one guarded write.
    ///
    /// Fails with `StockGuard` if the result would be negative, and with
    /// `NotFound` if the product does not exist.
    async fn adjust_stock(&mut self, id: ProductId, delta: i64) -> Result<Product>;

    async fn insert_category(&mut self, category: NewCategory) -> Result<ProductCategory>;

    async fn insert_user(&mut self, user: NewUser) -> Result<User>;

    async fn cart_for_user(&mut self, user_id: UserId) -> Result<Option<Cart>>;

    async fn insert_cart(&mut self, user_id: UserId) -> Result<Cart>;

    async fn cart_items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>>;

    /// Adds `quantity` to the cart's line for the product, creating the line
    /// if it does not exist yet.
    async fn upsert_cart_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem>;

    async fn set_cart_item_quantity(&mut self, item_id: CartItemId, quantity: u32)
    -> Result<CartItem>;

    async fn delete_cart_item(&mut self, item_id: CartItemId) -> Result<CartItem>;

    /// Removes every line of a cart, returning how many were removed.
    async fn clear_cart(&mut self, cart_id: CartId) -> Result<u64>;

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Inserts an order in `Pending` status.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order>;

    async fn attach_payment(&mut self, order_id: OrderId, payment_id: PaymentId) -> Result<Order>;

    async fn payment(&mut self, id: PaymentId) -> Result<Option<Payment>>;

    /// Inserts a payment in `Pending` status. Fails with `Duplicate` if the
    /// order already has one.
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment>;

    /// Persists status, transaction id and payment date.
    async fn update_payment(&mut self, payment: &Payment) -> Result<Payment>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
