//! Cache key derivation.
//!
//! Every key the engine reads or invalidates is built here. Write paths never
//! format keys themselves: they ask the written record for its
//! [`InvalidationSet`], which covers the primary key and every secondary index.

use std::collections::BTreeSet;
use std::fmt;

use common::{CartId, CategoryId, OrderId, PaymentId, ProductId, UserId};

use crate::records::{Cart, Order, Payment, Product, ProductCategory, User, UserProfile};

/// How long entries of a given key may live in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Catalog, users and orders.
    Stable,
    /// Carts and payments, which change more often.
    Volatile,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    Product(ProductId),
    ProductSku(String),
    Category(CategoryId),
    User(UserId),
    UserEmail(String),
    Cart(CartId),
    CartUser(UserId),
    Order(OrderId),
    UserOrders(UserId),
    Payment(PaymentId),
    PaymentOrder(OrderId),
}

impl CacheKey {
    /// Label used for metrics and logs.
    pub fn entity(&self) -> &'static str {
        match self {
            CacheKey::Product(_) | CacheKey::ProductSku(_) => "product",
            CacheKey::Category(_) => "category",
            CacheKey::User(_) | CacheKey::UserEmail(_) => "user",
            CacheKey::Cart(_) | CacheKey::CartUser(_) => "cart",
            CacheKey::Order(_) | CacheKey::UserOrders(_) => "order",
            CacheKey::Payment(_) | CacheKey::PaymentOrder(_) => "payment",
        }
    }

    pub fn ttl_class(&self) -> TtlClass {
        match self {
            CacheKey::Cart(_)
            | CacheKey::CartUser(_)
            | CacheKey::Payment(_)
            | CacheKey::PaymentOrder(_) => TtlClass::Volatile,
            _ => TtlClass::Stable,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Product(id) => write!(f, "product:{id}"),
            CacheKey::ProductSku(sku) => write!(f, "product:sku:{sku}"),
            CacheKey::Category(id) => write!(f, "category:{id}"),
            CacheKey::User(id) => write!(f, "user:{id}"),
            CacheKey::UserEmail(email) => write!(f, "user:email:{email}"),
            CacheKey::Cart(id) => write!(f, "cart:{id}"),
            CacheKey::CartUser(id) => write!(f, "cart:user:{id}"),
            CacheKey::Order(id) => write!(f, "order:{id}"),
            CacheKey::UserOrders(id) => write!(f, "orders:user:{id}"),
            CacheKey::Payment(id) => write!(f, "payment:{id}"),
            CacheKey::PaymentOrder(id) => write!(f, "payment:order:{id}"),
        }
    }
}

/// The set of cache keys made stale by a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationSet {
    keys: BTreeSet<CacheKey>,
}

impl InvalidationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CacheKey) {
        self.keys.insert(key);
    }

    pub fn extend(&mut self, other: InvalidationSet) {
        self.keys.extend(other.keys);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.keys.iter()
    }
}

impl FromIterator<CacheKey> for InvalidationSet {
    fn from_iter<I: IntoIterator<Item = CacheKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Records that know which cache entries describe them.
pub trait CacheKeys {
    fn cache_keys(&self) -> InvalidationSet;
}

impl CacheKeys for Product {
    fn cache_keys(&self) -> InvalidationSet {
        [
            CacheKey::Product(self.id),
            CacheKey::ProductSku(self.sku.clone()),
        ]
        .into_iter()
        .collect()
    }
}

impl CacheKeys for ProductCategory {
    fn cache_keys(&self) -> InvalidationSet {
        [CacheKey::Category(self.id)].into_iter().collect()
    }
}

impl CacheKeys for User {
    fn cache_keys(&self) -> InvalidationSet {
        [
            CacheKey::User(self.id),
            CacheKey::UserEmail(self.email.clone()),
        ]
        .into_iter()
        .collect()
    }
}

impl CacheKeys for UserProfile {
    fn cache_keys(&self) -> InvalidationSet {
        [
            CacheKey::User(self.id),
            CacheKey::UserEmail(self.email.clone()),
        ]
        .into_iter()
        .collect()
    }
}

impl CacheKeys for Cart {
    fn cache_keys(&self) -> InvalidationSet {
        [CacheKey::Cart(self.id), CacheKey::CartUser(self.user_id)]
            .into_iter()
            .collect()
    }
}

impl CacheKeys for Order {
    fn cache_keys(&self) -> InvalidationSet {
        [CacheKey::Order(self.id), CacheKey::UserOrders(self.user_id)]
            .into_iter()
            .collect()
    }
}

impl CacheKeys for Payment {
    fn cache_keys(&self) -> InvalidationSet {
        [
            CacheKey::Payment(self.id),
            CacheKey::PaymentOrder(self.order_id),
        ]
        .into_iter()
        .collect()
    }
}
