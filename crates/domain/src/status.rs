//! Status transition enforcement.
//!
//! Every status change in the services goes through [`ensure_transition`]
//! before anything is persisted.

use common::{StatusMachine, Transition};

use crate::error::Result;

/// Validates `from -> to` against the entity's state machine.
pub fn ensure_transition<S: StatusMachine>(from: S, to: S) -> Result<Transition<S>> {
    match from.validate(to) {
        Ok(transition) => Ok(transition),
        Err(rejected) => {
            tracing::debug!(
                entity = S::ENTITY,
                from = %rejected.from,
                to = %rejected.to,
                "Status transition rejected"
            );
            Err(rejected.into())
        }
    }
}
