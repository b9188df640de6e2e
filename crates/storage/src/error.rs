use common::ProductId;
use thiserror::Error;

use crate::records::EntityKind;

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// A guarded stock adjustment would have driven stock below zero.
    #[error("Stock guard rejected adjustment of {delta} for product {product_id}")]
    StockGuard { product_id: ProductId, delta: i64 },

    /// A uniqueness constraint was violated.
    #[error("Duplicate {entity}: {field} already exists")]
    Duplicate {
        entity: EntityKind,
        field: &'static str,
    },

    /// A check constraint rejected the written values.
    #[error("{entity} violates constraint {constraint}")]
    Constraint {
        entity: EntityKind,
        constraint: String,
    },

    /// The record is still referenced and cannot be removed.
    #[error("{entity} {id} is still referenced: {reason}")]
    Referenced {
        entity: EntityKind,
        id: String,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded into a record.
    #[error("Corrupt record: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for failures of the store itself rather than of the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::Migration(_)
                | StoreError::Unavailable(_)
                | StoreError::Decode(_)
        )
    }
}

/// Errors raised by a cache backend. Never fatal to a store operation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
