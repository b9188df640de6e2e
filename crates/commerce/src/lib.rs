//! Commerce engine assembly.
//!
//! [`Commerce`] wires the record store, the cache, the notifier and every
//! service together. Each service shares one [`CacheAsideStore`], so a write
//! committed through any of them is visible to reads through all of them.

pub mod config;
pub mod telemetry;

use std::sync::Arc;

use domain::{CartAggregate, InventoryLedger, ProductCatalog, UserDirectory};
use fulfillment::{
    BackgroundNotifier, EventNotifier, LoggingSink, OrderFulfillmentWorkflow, PaymentLifecycle,
};
use sqlx::postgres::PgPoolOptions;
use storage::{
    CacheAsideStore, CacheTtls, InMemoryRecordStore, KeyValueCache, MokaCache, NoopCache,
    PostgresRecordStore, RecordStore,
};
use thiserror::Error;
use tracing::info;

pub use common;
pub use config::{Config, LogFormat};
pub use domain;
pub use fulfillment;
pub use storage;
pub use telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Every service of the engine over one shared cache-aside store.
pub struct Commerce<S: RecordStore> {
    pub store: Arc<CacheAsideStore<S>>,
    pub catalog: ProductCatalog<S>,
    pub users: UserDirectory<S>,
    pub carts: CartAggregate<S>,
    pub inventory: InventoryLedger<S>,
    pub orders: OrderFulfillmentWorkflow<S>,
    pub payments: PaymentLifecycle<S>,
}

impl<S: RecordStore> Commerce<S> {
    pub fn new(
        record_store: S,
        cache: Arc<dyn KeyValueCache>,
        ttls: CacheTtls,
        notifier: Arc<dyn EventNotifier>,
        currency: &str,
    ) -> Self {
        let store = Arc::new(CacheAsideStore::new(record_store, cache, ttls));
        Self {
            catalog: ProductCatalog::new(store.clone()),
            users: UserDirectory::new(store.clone()),
            carts: CartAggregate::new(store.clone()),
            inventory: InventoryLedger::new(store.clone()),
            orders: OrderFulfillmentWorkflow::new(store.clone(), notifier.clone()),
            payments: PaymentLifecycle::new(store.clone(), notifier).with_currency(currency),
            store,
        }
    }

    fn from_config(record_store: S, config: &Config) -> Self {
        Self::new(
            record_store,
            cache_for(config),
            config.cache_ttls(),
            notifier_for(config),
            &config.default_currency,
        )
    }
}

impl Commerce<InMemoryRecordStore> {
    /// Builds the engine over a fresh in-memory store.
    pub fn in_memory(config: &Config) -> Self {
        info!(cache = config.cache_enabled, "Starting with in-memory store");
        Self::from_config(InMemoryRecordStore::new(), config)
    }
}

impl Commerce<PostgresRecordStore> {
    /// Connects to `DATABASE_URL`, applies migrations and builds the engine.
    pub async fn connect(config: &Config) -> Result<Self, BootstrapError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(BootstrapError::MissingDatabaseUrl)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await?;

        let store = PostgresRecordStore::new(pool);
        store.run_migrations().await?;
        info!(
            max_connections = config.database_max_connections,
            cache = config.cache_enabled,
            "Connected to PostgreSQL"
        );
        Ok(Self::from_config(store, config))
    }
}

fn cache_for(config: &Config) -> Arc<dyn KeyValueCache> {
    if config.cache_enabled {
        Arc::new(MokaCache::new(config.cache_max_capacity))
    } else {
        Arc::new(NoopCache)
    }
}

fn notifier_for(config: &Config) -> Arc<dyn EventNotifier> {
    Arc::new(BackgroundNotifier::new(LoggingSink, config.retry_policy()))
}
