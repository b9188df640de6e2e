//! Order fulfillment for the commerce engine.
//!
//! - [`OrderFulfillmentWorkflow`] turns a cart into an order in one unit of
//!   work and drives order status changes.
//! - [`PaymentLifecycle`] creates payments and applies their outcomes to the
//!   owning order.
//! - [`notifier`] carries post-commit notifications to an external sink.

pub mod notifier;
pub mod orders;
pub mod payments;

pub use notifier::{
    BackgroundNotifier, EventNotifier, EventSink, LoggingSink, Notification, NotifyError,
    RecordingNotifier, RetryPolicy, Topic,
};
pub use orders::OrderFulfillmentWorkflow;
pub use payments::{DEFAULT_CURRENCY, PaymentLifecycle};
