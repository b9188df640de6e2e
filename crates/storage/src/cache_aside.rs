//! Cache-aside coordination over a [`RecordStore`].
//!
//! Reads go to the cache first and fall back to the store, populating the
//! cache on the way out. Writes go through a [`UnitOfWork`], which collects
//! the invalidation set of every record it touches and deletes those keys
//! only once the transaction has committed. Cache failures are logged,
//! counted and bypassed; they never fail an operation.

use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::{
    CartId, CartItemId, CategoryId, OrderId, OrderStatus, PaymentId, ProductId, UserId,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::KeyValueCache;
use crate::keys::{CacheKey, CacheKeys, InvalidationSet, TtlClass};
use crate::records::{
    Cart, CartItem, CartSnapshot, NewCategory, NewOrder, NewPayment, NewProduct, NewUser, Order,
    Payment, Product, ProductCategory, ProductDeletion, User, UserProfile,
};
use crate::store::{RecordStore, Transaction};
use crate::Result;

/// Time-to-live per [`TtlClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub stable: Duration,
    pub volatile: Duration,
}

impl CacheTtls {
    pub fn for_key(&self, key: &CacheKey) -> Duration {
        match key.ttl_class() {
            TtlClass::Stable => self.stable,
            TtlClass::Volatile => self.volatile,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            stable: Duration::from_secs(30 * 60),
            volatile: Duration::from_secs(15 * 60),
        }
    }
}

const GENERATION_STRIPES: usize = 64;

/// Invalidation counters, striped by key hash.
///
/// A reader records the generation of its key before loading from the store
/// and discards its cache write if the generation moved in the meantime.
/// Keys that share a stripe only cause extra misses.
struct KeyGenerations {
    stripes: [AtomicU64; GENERATION_STRIPES],
}

impl KeyGenerations {
    fn new() -> Self {
        Self {
            stripes: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn stripe(&self, key: &CacheKey) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() % GENERATION_STRIPES as u64) as usize]
    }

    fn current(&self, key: &CacheKey) -> u64 {
        self.stripe(key).load(Ordering::SeqCst)
    }

    fn bump(&self, key: &CacheKey) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }
}

pub struct CacheAsideStore<S> {
    store: S,
    cache: Arc<dyn KeyValueCache>,
    ttls: CacheTtls,
    generations: KeyGenerations,
}

impl<S: RecordStore> CacheAsideStore<S> {
    pub fn new(store: S, cache: Arc<dyn KeyValueCache>, ttls: CacheTtls) -> Self {
        Self {
            store,
            cache,
            ttls,
            generations: KeyGenerations::new(),
        }
    }

    /// The underlying durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a unit of work. Nothing is invalidated until it commits.
    pub async fn begin(&self) -> Result<UnitOfWork<'_, S>> {
        let tx = self.store.begin().await?;
        Ok(UnitOfWork {
            owner: self,
            tx,
            pending: InvalidationSet::new(),
        })
    }

    /// Deletes every key in the set, logging and counting failures.
    ///
    /// Reads of these keys that are already in flight will not repopulate
    /// the cache with what they loaded.
    pub async fn invalidate(&self, keys: &InvalidationSet) {
        for key in keys.iter() {
            self.generations.bump(key);
            self.evict(key).await;
        }
    }

    async fn evict(&self, key: &CacheKey) {
        if let Err(e) = self.cache.delete(&key.to_string()).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
            metrics::counter!("cache_errors_total", "entity" => key.entity()).increment(1);
        }
    }

    /// Writes a freshly loaded value unless `key` was invalidated after
    /// `generation` was observed.
    async fn populate<T: Serialize>(&self, key: &CacheKey, value: &T, generation: u64) {
        if self.generations.current(key) != generation {
            debug!(key = %key, "Skipping cache fill for invalidated key");
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&key.to_string(), raw, self.ttls.for_key(key))
            .await
        {
            warn!(key = %key, error = %e, "Cache write failed");
            metrics::counter!("cache_errors_total", "entity" => key.entity()).increment(1);
            return;
        }
        // An invalidation that ran while the write was in flight may have
        // deleted the key before the stale value landed.
        if self.generations.current(key) != generation {
            debug!(key = %key, "Key invalidated during cache fill, evicting");
            self.evict(key).await;
        }
    }

    async fn read_through<T, F, Fut>(&self, key: CacheKey, load: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match self.cache.get(&key.to_string()).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    metrics::counter!("cache_hits_total", "entity" => key.entity()).increment(1);
                    return Ok(Some(value));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Evicting corrupt cache entry");
                    self.evict(&key).await;
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                metrics::counter!("cache_misses_total", "entity" => key.entity()).increment(1);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, falling back to store");
                metrics::counter!("cache_errors_total", "entity" => key.entity()).increment(1);
            }
        }

        let generation = self.generations.current(&key);
        let value = load().await?;
        if let Some(value) = &value {
            self.populate(&key, value, generation).await;
        }
        Ok(value)
    }

    pub async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        self.read_through(CacheKey::Product(id), || self.store.product(id))
            .await
    }

    pub async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        self.read_through(CacheKey::ProductSku(sku.to_string()), || {
            self.store.product_by_sku(sku)
        })
        .await
    }

    pub async fn category(&self, id: CategoryId) -> Result<Option<ProductCategory>> {
        self.read_through(CacheKey::Category(id), || self.store.category(id))
            .await
    }

    pub async fn user(&self, id: UserId) -> Result<Option<UserProfile>> {
        self.read_through(CacheKey::User(id), || async move {
            self.store.user(id).await.map(|user| user.map(UserProfile::from))
        })
        .await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        self.read_through(CacheKey::UserEmail(email.to_string()), || async move {
            self.store
                .user_by_email(email)
                .await
                .map(|user| user.map(UserProfile::from))
        })
        .await
    }

    /// Full user record including the password hash. Never cached.
    pub async fn credentials(&self, email: &str) -> Result<Option<User>> {
        self.store.user_by_email(email).await
    }

    pub async fn cart(&self, id: CartId) -> Result<Option<CartSnapshot>> {
        self.read_through(CacheKey::Cart(id), || async move {
            let cart = self.store.cart(id).await;
            self.snapshot(cart).await
        })
        .await
    }

    pub async fn cart_for_user(&self, user_id: UserId) -> Result<Option<CartSnapshot>> {
        self.read_through(CacheKey::CartUser(user_id), || async move {
            let cart = self.store.cart_for_user(user_id).await;
            self.snapshot(cart).await
        })
        .await
    }

    async fn snapshot(&self, cart: Result<Option<Cart>>) -> Result<Option<CartSnapshot>> {
        let Some(cart) = cart? else {
            return Ok(None);
        };
        let items = self.store.cart_items(cart.id).await?;
        Ok(Some(CartSnapshot { cart, items }))
    }

    pub async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.read_through(CacheKey::Order(id), || self.store.order(id))
            .await
    }

    /// A user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let orders = self
            .read_through(CacheKey::UserOrders(user_id), || async move {
                self.store.orders_for_user(user_id).await.map(Some)
            })
            .await?;
        Ok(orders.unwrap_or_default())
    }

    pub async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read_through(CacheKey::Payment(id), || self.store.payment(id))
            .await
    }

    pub async fn payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        self.read_through(CacheKey::PaymentOrder(order_id), || {
            self.store.payment_for_order(order_id)
        })
        .await
    }
}

/// A transaction plus the cache keys its writes have made stale.
///
/// Dropping a unit of work without committing rolls the transaction back
/// and leaves the cache untouched.
pub struct UnitOfWork<'a, S: RecordStore> {
    owner: &'a CacheAsideStore<S>,
    tx: S::Tx,
    pending: InvalidationSet,
}

impl<'a, S: RecordStore> UnitOfWork<'a, S> {
    fn record<R: CacheKeys>(&mut self, record: &R) {
        self.pending.extend(record.cache_keys());
    }

    /// Keys that will be invalidated on commit.
    pub fn pending(&self) -> &InvalidationSet {
        &self.pending
    }

    pub async fn product(&mut self, id: ProductId) -> Result<Option<Product>> {
        self.tx.product(id).await
    }

    pub async fn cart_for_user(&mut self, user_id: UserId) -> Result<Option<Cart>> {
        self.tx.cart_for_user(user_id).await
    }

    pub async fn cart_items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>> {
        self.tx.cart_items(cart_id).await
    }

    pub async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.tx.order(id).await
    }

    pub async fn payment(&mut self, id: PaymentId) -> Result<Option<Payment>> {
        self.tx.payment(id).await
    }

    pub async fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        let product = self.tx.insert_product(product).await?;
        self.record(&product);
        Ok(product)
    }

    /// Also invalidates the previous SKU index entry when the SKU changes.
    pub async fn update_product(&mut self, product: &Product) -> Result<Product> {
        if let Some(before) = self.tx.product(product.id).await? {
            self.record(&before);
        }
        let product = self.tx.update_product(product).await?;
        self.record(&product);
        Ok(product)
    }

    pub async fn delete_product(&mut self, id: ProductId) -> Result<ProductDeletion> {
        let deletion = self.tx.delete_product(id).await?;
        self.record(&deletion.product);
        for cart in &deletion.affected_carts {
            self.record(cart);
        }
        Ok(deletion)
    }

    pub async fn adjust_stock(&mut self, id: ProductId, delta: i64) -> Result<Product> {
        let product = self.tx.adjust_stock(id, delta).await?;
        self.record(&product);
        Ok(product)
    }

    pub async fn insert_category(&mut self, category: NewCategory) -> Result<ProductCategory> {
        let category = self.tx.insert_category(category).await?;
        self.record(&category);
        Ok(category)
    }

    pub async fn insert_user(&mut self, user: NewUser) -> Result<User> {
        let user = self.tx.insert_user(user).await?;
        self.record(&user);
        Ok(user)
    }

    pub async fn insert_cart(&mut self, user_id: UserId) -> Result<Cart> {
        let cart = self.tx.insert_cart(user_id).await?;
        self.record(&cart);
        Ok(cart)
    }

    pub async fn upsert_cart_item(
        &mut self,
        cart: &Cart,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let item = self.tx.upsert_cart_item(cart.id, product_id, quantity).await?;
        self.record(cart);
        Ok(item)
    }

    pub async fn set_cart_item_quantity(
        &mut self,
        cart: &Cart,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem> {
        let item = self.tx.set_cart_item_quantity(item_id, quantity).await?;
        self.record(cart);
        Ok(item)
    }

    pub async fn delete_cart_item(&mut self, cart: &Cart, item_id: CartItemId) -> Result<CartItem> {
        let item = self.tx.delete_cart_item(item_id).await?;
        self.record(cart);
        Ok(item)
    }

    pub async fn clear_cart(&mut self, cart: &Cart) -> Result<u64> {
        let removed = self.tx.clear_cart(cart.id).await?;
        self.record(cart);
        Ok(removed)
    }

    pub async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let order = self.tx.insert_order(order).await?;
        self.record(&order);
        Ok(order)
    }

    pub async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let order = self.tx.update_order_status(id, status).await?;
        self.record(&order);
        Ok(order)
    }

    pub async fn attach_payment(&mut self, order_id: OrderId, payment_id: PaymentId) -> Result<Order> {
        let order = self.tx.attach_payment(order_id, payment_id).await?;
        self.record(&order);
        Ok(order)
    }

    pub async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let payment = self.tx.insert_payment(payment).await?;
        self.record(&payment);
        Ok(payment)
    }

    pub async fn update_payment(&mut self, payment: &Payment) -> Result<Payment> {
        let payment = self.tx.update_payment(payment).await?;
        self.record(&payment);
        Ok(payment)
    }

    /// Commits the transaction, then invalidates every collected key.
    pub async fn commit(self) -> Result<()> {
        let UnitOfWork { owner, tx, pending } = self;
        tx.commit().await?;
        owner.invalidate(&pending).await;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await
    }
}
