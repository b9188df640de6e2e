//! Domain error types.

use common::{InvalidTransition, Money, OrderId, ProductId, StatusMachine};
use storage::{CacheError, EntityKind, StoreError};
use thiserror::Error;

/// Errors surfaced by the commerce services.
///
/// Business-rule violations are reported to the immediate caller and never
/// retried. Store failures propagate unchanged as `StoreUnavailable`.
#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: &'static str, reason: String },

    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    #[error("Invalid {entity} status transition from {from} to {to}")]
    InvalidStatusTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order {order_id} already has a payment")]
    DuplicatePayment { order_id: OrderId },

    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: Money, actual: Money },

    /// Durable store I/O failure. Fatal to the operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Never returned by the services: cache failures are downgraded to a
    /// store fallback inside the cache-aside layer.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),
}

impl CommerceError {
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        CommerceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        CommerceError::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for CommerceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CommerceError::NotFound { entity, id },
            StoreError::StockGuard { product_id, .. } => {
                CommerceError::InsufficientStock { product_id }
            }
            StoreError::Duplicate { entity, field } => CommerceError::ValidationFailed {
                field,
                reason: format!("a {entity} with this {field} already exists"),
            },
            StoreError::Constraint { entity, constraint } => CommerceError::ValidationFailed {
                field: entity.as_str(),
                reason: format!("violates {constraint}"),
            },
            StoreError::Referenced { entity, id, reason } => CommerceError::ValidationFailed {
                field: entity.as_str(),
                reason: format!("{entity} {id} is still referenced: {reason}"),
            },
            other => CommerceError::StoreUnavailable(other),
        }
    }
}

impl<S: StatusMachine> From<InvalidTransition<S>> for CommerceError {
    fn from(err: InvalidTransition<S>) -> Self {
        CommerceError::InvalidStatusTransition {
            entity: err.entity,
            from: err.from.to_string(),
            to: err.to.to_string(),
        }
    }
}

/// Result type for commerce operations.
pub type Result<T> = std::result::Result<T, CommerceError>;
