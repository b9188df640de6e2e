use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    CartId, CartItemId, CategoryId, OrderId, OrderStatus, PaymentId, PaymentStatus, ProductId,
    StatusMachine, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::records::{
    Cart, CartItem, EntityKind, NewCategory, NewOrder, NewPayment, NewProduct, NewUser, Order,
    Payment, Product, ProductCategory, ProductDeletion, User,
};
use crate::store::{RecordStore, Transaction};
use crate::{Result, StoreError};

#[derive(Debug, Clone, Default)]
struct Sequences {
    product: u64,
    category: u64,
    user: u64,
    cart: u64,
    cart_item: u64,
    order: u64,
    payment: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    categories: BTreeMap<CategoryId, ProductCategory>,
    users: BTreeMap<UserId, User>,
    carts: BTreeMap<CartId, Cart>,
    cart_items: BTreeMap<CartItemId, CartItem>,
    orders: BTreeMap<OrderId, Order>,
    payments: BTreeMap<PaymentId, Payment>,
    sequences: Sequences,
}

impl Tables {
    fn product_by_sku(&self, sku: &str) -> Option<&Product> {
        self.products.values().find(|p| p.sku == sku)
    }

    fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }

    fn cart_for_user(&self, user_id: UserId) -> Option<&Cart> {
        self.carts.values().find(|c| c.user_id == user_id)
    }

    fn cart_items(&self, cart_id: CartId) -> Vec<CartItem> {
        self.cart_items
            .values()
            .filter(|item| item.cart_id == cart_id)
            .cloned()
            .collect()
    }

    fn orders_for_user(&self, user_id: UserId) -> Vec<Order> {
        self.orders
            .values()
            .rev()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect()
    }

    fn payment_for_order(&self, order_id: OrderId) -> Option<&Payment> {
        self.payments.values().find(|p| p.order_id == order_id)
    }

    fn touch_cart(&mut self, cart_id: CartId) {
        if let Some(cart) = self.carts.get_mut(&cart_id) {
            cart.updated_at = Utc::now();
        }
    }

    fn check_product_values(&self, product: &NewProduct) -> Result<()> {
        if product.price.is_negative() {
            return Err(constraint(EntityKind::Product, "products_price_check"));
        }
        if product.stock_quantity < 0 {
            return Err(constraint(EntityKind::Product, "products_stock_quantity_check"));
        }
        if let Some(category_id) = product.category_id
            && !self.categories.contains_key(&category_id)
        {
            return Err(StoreError::not_found(EntityKind::Category, category_id));
        }
        Ok(())
    }
}

fn constraint(entity: EntityKind, name: &str) -> StoreError {
    StoreError::Constraint {
        entity,
        constraint: name.to_string(),
    }
}

/// In-memory record store implementation for testing and local runs.
///
/// Writers are serialised: a transaction holds the writer lock for its whole
/// lifetime and works on a private copy of the tables, which replaces the
/// committed tables on commit. Committed reads never wait on an open
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        check_available(&self.unavailable)
    }
}

fn check_available(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Err(StoreError::Unavailable(
            "in-memory store marked unavailable".to_string(),
        ))
    } else {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        self.check_available()?;
        let writer = self.writer.clone().lock_owned().await;
        let staged = self.committed.read().await.clone();
        Ok(InMemoryTransaction {
            _writer: writer,
            staged,
            committed: self.committed.clone(),
            unavailable: self.unavailable.clone(),
        })
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        self.check_available()?;
        Ok(self.committed.read().await.products.get(&id).cloned())
    }

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        self.check_available()?;
        Ok(self.committed.read().await.product_by_sku(sku).cloned())
    }

    async fn category(&self, id: CategoryId) -> Result<Option<ProductCategory>> {
        self.check_available()?;
        Ok(self.committed.read().await.categories.get(&id).cloned())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        self.check_available()?;
        Ok(self.committed.read().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.check_available()?;
        Ok(self.committed.read().await.user_by_email(email).cloned())
    }

    async fn cart(&self, id: CartId) -> Result<Option<Cart>> {
        self.check_available()?;
        Ok(self.committed.read().await.carts.get(&id).cloned())
    }

    async fn cart_for_user(&self, user_id: UserId) -> Result<Option<Cart>> {
        self.check_available()?;
        Ok(self.committed.read().await.cart_for_user(user_id).cloned())
    }

    async fn cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        self.check_available()?;
        Ok(self.committed.read().await.cart_items(cart_id))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self.committed.read().await.orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.check_available()?;
        Ok(self.committed.read().await.orders_for_user(user_id))
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.check_available()?;
        Ok(self.committed.read().await.payments.get(&id).cloned())
    }

    async fn payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        self.check_available()?;
        Ok(self
            .committed
            .read()
            .await
            .payment_for_order(order_id)
            .cloned())
    }
}

/// Transaction over [`InMemoryRecordStore`].
pub struct InMemoryTransaction {
    _writer: OwnedMutexGuard<()>,
    staged: Tables,
    committed: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryTransaction {
    fn tables(&mut self) -> Result<&mut Tables> {
        check_available(&self.unavailable)?;
        Ok(&mut self.staged)
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables()?.products.get(&id).cloned())
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        let tables = self.tables()?;
        tables.check_product_values(&product)?;
        if tables.product_by_sku(&product.sku).is_some() {
            return Err(StoreError::Duplicate {
                entity: EntityKind::Product,
                field: "sku",
            });
        }

        let now = Utc::now();
        let record = Product {
            id: ProductId::new(next(&mut tables.sequences.product)),
            name: product.name,
            description: product.description,
            price: product.price,
            stock_quantity: product.stock_quantity,
            sku: product.sku,
            category_id: product.category_id,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_product(&mut self, product: &Product) -> Result<Product> {
        let tables = self.tables()?;
        let stored = tables
            .products
            .get(&product.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Product, product.id))?;

        tables.check_product_values(&NewProduct {
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            stock_quantity: stored.stock_quantity,
            sku: product.sku.clone(),
            category_id: product.category_id,
        })?;
        if tables
            .product_by_sku(&product.sku)
            .is_some_and(|other| other.id != product.id)
        {
            return Err(StoreError::Duplicate {
                entity: EntityKind::Product,
                field: "sku",
            });
        }

        let record = Product {
            stock_quantity: stored.stock_quantity,
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..product.clone()
        };
        tables.products.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<ProductDeletion> {
        let tables = self.tables()?;
        if !tables.products.contains_key(&id) {
            return Err(StoreError::not_found(EntityKind::Product, id));
        }

        let open_order = tables.orders.values().find(|order| {
            !order.status.is_terminal() && order.items.iter().any(|i| i.product_id == id)
        });
        if let Some(order) = open_order {
            return Err(StoreError::Referenced {
                entity: EntityKind::Product,
                id: id.to_string(),
                reason: format!("order {} is {}", order.id, order.status),
            });
        }

        let mut cart_ids: Vec<CartId> = tables
            .cart_items
            .values()
            .filter(|item| item.product_id == id)
            .map(|item| item.cart_id)
            .collect();
        cart_ids.sort();
        cart_ids.dedup();
        tables.cart_items.retain(|_, item| item.product_id != id);

        let affected_carts = cart_ids
            .iter()
            .filter_map(|cart_id| tables.carts.get(cart_id).cloned())
            .collect();
        let product = tables
            .products
            .remove(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Product, id))?;

        Ok(ProductDeletion {
            product,
            affected_carts,
        })
    }

    async fn adjust_stock(&mut self, id: ProductId, delta: i64) -> Result<Product> {
        let tables = self.tables()?;
        let product = tables
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Product, id))?;

        match product.stock_quantity.checked_add(delta) {
            Some(stock) if stock >= 0 => {
                product.stock_quantity = stock;
                product.updated_at = Utc::now();
                Ok(product.clone())
            }
            _ => Err(StoreError::StockGuard {
                product_id: id,
                delta,
            }),
        }
    }

    async fn insert_category(&mut self, category: NewCategory) -> Result<ProductCategory> {
        let tables = self.tables()?;
        if let Some(parent_id) = category.parent_id
            && !tables.categories.contains_key(&parent_id)
        {
            return Err(StoreError::not_found(EntityKind::Category, parent_id));
        }

        let record = ProductCategory {
            id: CategoryId::new(next(&mut tables.sequences.category)),
            name: category.name,
            parent_id: category.parent_id,
            created_at: Utc::now(),
        };
        tables.categories.insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User> {
        let tables = self.tables()?;
        if tables.user_by_email(&user.email).is_some() {
            return Err(StoreError::Duplicate {
                entity: EntityKind::User,
                field: "email",
            });
        }

        let record = User {
            id: UserId::new(next(&mut tables.sequences.user)),
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            created_at: Utc::now(),
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn cart_for_user(&mut self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.tables()?.cart_for_user(user_id).cloned())
    }

    async fn insert_cart(&mut self, user_id: UserId) -> Result<Cart> {
        let tables = self.tables()?;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::not_found(EntityKind::User, user_id));
        }
        if tables.cart_for_user(user_id).is_some() {
            return Err(StoreError::Duplicate {
                entity: EntityKind::Cart,
                field: "user_id",
            });
        }

        let now = Utc::now();
        let record = Cart {
            id: CartId::new(next(&mut tables.sequences.cart)),
            user_id,
            created_at: now,
            updated_at: now,
        };
        tables.carts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn cart_items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>> {
        Ok(self.tables()?.cart_items(cart_id))
    }

    async fn upsert_cart_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let tables = self.tables()?;
        if quantity == 0 {
            return Err(constraint(EntityKind::CartItem, "cart_items_quantity_check"));
        }
        if !tables.carts.contains_key(&cart_id) {
            return Err(StoreError::not_found(EntityKind::Cart, cart_id));
        }
        if !tables.products.contains_key(&product_id) {
            return Err(StoreError::not_found(EntityKind::Product, product_id));
        }

        let existing = tables
            .cart_items
            .values_mut()
            .find(|item| item.cart_id == cart_id && item.product_id == product_id);
        let record = match existing {
            Some(item) => {
                item.quantity = item.quantity.checked_add(quantity).ok_or_else(|| {
                    constraint(EntityKind::CartItem, "cart_items_quantity_check")
                })?;
                item.clone()
            }
            None => {
                let item = CartItem {
                    id: CartItemId::new(next(&mut tables.sequences.cart_item)),
                    cart_id,
                    product_id,
                    quantity,
                };
                tables.cart_items.insert(item.id, item.clone());
                item
            }
        };
        tables.touch_cart(cart_id);
        Ok(record)
    }

    async fn set_cart_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem> {
        let tables = self.tables()?;
        if quantity == 0 {
            return Err(constraint(EntityKind::CartItem, "cart_items_quantity_check"));
        }
        let item = tables
            .cart_items
            .get_mut(&item_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::CartItem, item_id))?;
        item.quantity = quantity;
        let record = item.clone();
        tables.touch_cart(record.cart_id);
        Ok(record)
    }

    async fn delete_cart_item(&mut self, item_id: CartItemId) -> Result<CartItem> {
        let tables = self.tables()?;
        let record = tables
            .cart_items
            .remove(&item_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::CartItem, item_id))?;
        tables.touch_cart(record.cart_id);
        Ok(record)
    }

    async fn clear_cart(&mut self, cart_id: CartId) -> Result<u64> {
        let tables = self.tables()?;
        let before = tables.cart_items.len();
        tables.cart_items.retain(|_, item| item.cart_id != cart_id);
        tables.touch_cart(cart_id);
        Ok((before - tables.cart_items.len()) as u64)
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables()?.orders.get(&id).cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let tables = self.tables()?;
        if !tables.users.contains_key(&order.user_id) {
            return Err(StoreError::not_found(EntityKind::User, order.user_id));
        }
        if order.items.iter().any(|item| item.quantity == 0) {
            return Err(constraint(EntityKind::Order, "order_items_quantity_check"));
        }

        let now = Utc::now();
        let record = Order {
            id: OrderId::new(next(&mut tables.sequences.order)),
            user_id: order.user_id,
            items: order.items,
            total_amount: order.total_amount,
            status: OrderStatus::Pending,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.orders.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let tables = self.tables()?;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Order, id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn attach_payment(&mut self, order_id: OrderId, payment_id: PaymentId) -> Result<Order> {
        let tables = self.tables()?;
        if !tables.payments.contains_key(&payment_id) {
            return Err(StoreError::not_found(EntityKind::Payment, payment_id));
        }
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Order, order_id))?;
        order.payment_id = Some(payment_id);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn payment(&mut self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.tables()?.payments.get(&id).cloned())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let tables = self.tables()?;
        if !tables.orders.contains_key(&payment.order_id) {
            return Err(StoreError::not_found(EntityKind::Order, payment.order_id));
        }
        if tables.payment_for_order(payment.order_id).is_some() {
            return Err(StoreError::Duplicate {
                entity: EntityKind::Payment,
                field: "order_id",
            });
        }

        let now = Utc::now();
        let record = Payment {
            id: PaymentId::new(next(&mut tables.sequences.payment)),
            order_id: payment.order_id,
            amount: payment.amount,
            currency: payment.currency,
            method: payment.method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            payment_date: None,
            created_at: now,
            updated_at: now,
        };
        tables.payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<Payment> {
        let tables = self.tables()?;
        let stored = tables
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Payment, payment.id))?;
        stored.status = payment.status;
        stored.transaction_id = payment.transaction_id.clone();
        stored.payment_date = payment.payment_date;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn commit(self) -> Result<()> {
        check_available(&self.unavailable)?;
        *self.committed.write().await = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;

    fn new_product(sku: &str, stock: i64) -> NewProduct {
        NewProduct {
            name: format!("Product {sku}"),
            description: String::new(),
            price: Money::from_cents(1999),
            stock_quantity: stock,
            sku: sku.to_string(),
            category_id: None,
        }
    }

    async fn seed_product(store: &InMemoryRecordStore, sku: &str, stock: i64) -> Product {
        let mut tx = store.begin().await.unwrap();
        let product = tx.insert_product(new_product(sku, stock)).await.unwrap();
        tx.commit().await.unwrap();
        product
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 5).await;

        let loaded = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(loaded, product);
        let by_sku = store.product_by_sku("SKU-1").await.unwrap().unwrap();
        assert_eq!(by_sku.id, product.id);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 5).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.adjust_stock(product.id, -3).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        tx.adjust_stock(product.id, -1).await.unwrap();
        tx.rollback().await.unwrap();

        let loaded = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(loaded.stock_quantity, 5);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_to_readers() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.adjust_stock(product.id, -5).await.unwrap();

        let loaded = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(loaded.stock_quantity, 5);

        tx.commit().await.unwrap();
        let loaded = store.product(product.id).await.unwrap().unwrap();
        assert_eq!(loaded.stock_quantity, 0);
    }

    #[tokio::test]
    async fn stock_guard_rejects_negative_stock() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 2).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.adjust_stock(product.id, -3).await.unwrap_err();
        assert!(matches!(err, StoreError::StockGuard { delta: -3, .. }));

        let err = tx.adjust_stock(ProductId::new(99), 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                entity: EntityKind::Product,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let store = InMemoryRecordStore::new();
        seed_product(&store, "SKU-1", 2).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_product(new_product("SKU-1", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "sku", .. }));
    }

    #[tokio::test]
    async fn upsert_merges_quantities() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 10).await;

        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Default::default(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();
        let cart = tx.insert_cart(user.id).await.unwrap();
        let first = tx.upsert_cart_item(cart.id, product.id, 2).await.unwrap();
        let second = tx.upsert_cart_item(cart.id, product.id, 3).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        let items = store.cart_items(cart.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);
    }

    #[tokio::test]
    async fn one_payment_per_order() {
        let store = InMemoryRecordStore::new();
        let product = seed_product(&store, "SKU-1", 10).await;

        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Default::default(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();
        let order = tx
            .insert_order(NewOrder {
                user_id: user.id,
                items: vec![crate::records::OrderItem::snapshot(&product, 1)],
                total_amount: product.price,
                shipping_address: "1 Main St".to_string(),
                billing_address: "1 Main St".to_string(),
            })
            .await
            .unwrap();
        let payment = NewPayment {
            order_id: order.id,
            amount: order.total_amount,
            currency: "USD".to_string(),
            method: crate::records::PaymentMethod::CreditCard,
        };
        tx.insert_payment(payment.clone()).await.unwrap();
        let err = tx.insert_payment(payment).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Duplicate {
                entity: EntityKind::Payment,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true);

        assert!(store.product(ProductId::new(1)).await.unwrap_err().is_unavailable());
        assert!(store.begin().await.is_err());

        store.set_unavailable(false);
        assert!(store.product(ProductId::new(1)).await.unwrap().is_none());
    }
}
