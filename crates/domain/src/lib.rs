//! Domain services for the commerce engine.
//!
//! This crate provides:
//! - `CommerceError`, the typed error model every service returns
//! - status transition enforcement over the shared state machines
//! - `InventoryLedger` for guarded stock adjustments and restitution
//! - `CartAggregate`, `ProductCatalog` and `UserDirectory`
//!
//! All services read and write through a shared `CacheAsideStore`.

pub mod cart;
pub mod catalog;
pub mod error;
pub mod inventory;
pub mod status;
pub mod users;

pub use cart::{CartAggregate, CartLine, CartView, line_total};
pub use catalog::{ProductCatalog, ProductUpdate};
pub use error::{CommerceError, Result};
pub use inventory::InventoryLedger;
pub use status::ensure_transition;
pub use users::{UserDirectory, normalize_email};
