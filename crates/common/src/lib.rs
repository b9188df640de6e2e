//! Shared types for the commerce engine.
//!
//! Everything here is storage- and transport-agnostic: opaque identifiers,
//! exact money arithmetic, and the status state machines shared by orders
//! and payments.

mod ids;
mod money;
pub mod status;

pub use ids::{CartId, CartItemId, CategoryId, OrderId, PaymentId, ProductId, UserId};
pub use money::Money;
pub use status::{
    InvalidTransition, OrderStatus, PaymentStatus, StatusMachine, Transition, UnknownStatus,
};
