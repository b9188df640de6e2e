//! Status state machines shared by orders and payments.
//!
//! Both lifecycles are expressed through one [`StatusMachine`] trait: each
//! status lists its permitted successors and everything else (validation,
//! terminal detection) is derived from that table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A finite state machine over a status enum.
pub trait StatusMachine:
    Copy + Eq + fmt::Debug + fmt::Display + FromStr + Send + Sync + 'static
{
    /// Name of the entity whose status this is, used in error messages.
    const ENTITY: &'static str;

    /// Statuses reachable from `self` in a single step.
    fn successors(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// Returns true if no further transitions are possible.
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Validates a requested transition.
    ///
    /// Self-transitions are rejected like any other edge missing from the table.
    fn validate(self, requested: Self) -> Result<Transition<Self>, InvalidTransition<Self>> {
        if self.can_transition_to(requested) {
            Ok(Transition {
                from: self,
                to: requested,
            })
        } else {
            Err(InvalidTransition {
                entity: Self::ENTITY,
                from: self,
                to: requested,
            })
        }
    }
}

/// An accepted edge of a status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// A rejected edge of a status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid {entity} status transition from {from} to {to}")]
pub struct InvalidTransition<S: fmt::Display + fmt::Debug> {
    pub entity: &'static str,
    pub from: S,
    pub to: S,
}

/// Returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {entity} status: {value}")]
pub struct UnknownStatus {
    pub entity: &'static str,
    pub value: String,
}

/// The status of an order.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns the status name as stored and published.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl StatusMachine for OrderStatus {
    const ENTITY: &'static str = "order";

    fn successors(self) -> &'static [Self] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                entity: Self::ENTITY,
                value: s.to_string(),
            })
    }
}

/// The status of a payment.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Completed ──► Refunded
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl StatusMachine for PaymentStatus {
    const ENTITY: &'static str = "payment";

    fn successors(self) -> &'static [Self] {
        match self {
            PaymentStatus::Pending => &[PaymentStatus::Completed, PaymentStatus::Failed],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Refunded => &[],
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                entity: Self::ENTITY,
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_statuses_are_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pending);
    }

    #[test]
    fn test_order_transition_table() {
        use OrderStatus::*;
        let allowed = [
            (Pending, Processing),
            (Pending, Cancelled),
            (Processing, Shipped),
            (Processing, Cancelled),
            (Shipped, Delivered),
        ];
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_payment_transition_table() {
        use PaymentStatus::*;
        let allowed = [(Pending, Completed), (Pending, Failed), (Completed, Refunded)];
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_skipping_states_is_denied() {
        let err = OrderStatus::Pending
            .validate(OrderStatus::Shipped)
            .unwrap_err();
        assert_eq!(err.from, OrderStatus::Pending);
        assert_eq!(err.to, OrderStatus::Shipped);
        assert_eq!(
            err.to_string(),
            "invalid order status transition from pending to shipped"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Shipped.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Completed.is_terminal());
    }

    #[test]
    fn test_accepted_transition() {
        let transition = PaymentStatus::Pending
            .validate(PaymentStatus::Completed)
            .unwrap();
        assert_eq!(transition.from, PaymentStatus::Pending);
        assert_eq!(transition.to, PaymentStatus::Completed);
    }

    #[test]
    fn test_parse_roundtrip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        for status in PaymentStatus::ALL {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("archived".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
