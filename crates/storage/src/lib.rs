//! Durable records, the record-store port with in-memory and PostgreSQL
//! adapters, a TTL cache port, and the cache-aside layer that keeps the two
//! coherent.

pub mod cache;
pub mod cache_aside;
pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use cache::{KeyValueCache, MokaCache, NoopCache};
pub use cache_aside::{CacheAsideStore, CacheTtls, UnitOfWork};
pub use error::{CacheError, Result, StoreError};
pub use keys::{CacheKey, CacheKeys, InvalidationSet, TtlClass};
pub use memory::{InMemoryRecordStore, InMemoryTransaction};
pub use postgres::{PostgresRecordStore, PostgresTransaction};
pub use records::{
    Cart, CartItem, CartSnapshot, EntityKind, NewCategory, NewOrder, NewPayment, NewProduct,
    NewUser, Order, OrderItem, Payment, PaymentMethod, Product, ProductCategory, ProductDeletion,
    User, UserProfile, UserRole,
};
pub use store::{RecordStore, Transaction};
