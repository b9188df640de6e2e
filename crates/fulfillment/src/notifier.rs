//! Post-commit notifications.
//!
//! Workflows hand a [`Notification`] to an [`EventNotifier`] only after their
//! transaction has committed. Delivery is fire-and-forget from the
//! workflow's point of view: a failed delivery never undoes a committed
//! change.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storage::{Order, Payment};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    OrderCreated,
    OrderUpdated,
    PaymentStatus,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderCreated => "order-created",
            Topic::OrderUpdated => "order-updated",
            Topic::PaymentStatus => "payment-status",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: Topic,
    /// Partitioning key; the id of the entity the notification is about.
    pub key: String,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn order_created(order: &Order) -> Self {
        Self {
            topic: Topic::OrderCreated,
            key: order.id.to_string(),
            payload: json!({
                "order_id": order.id,
                "user_id": order.user_id,
                "status": order.status,
                "total_amount": order.total_amount.to_string(),
            }),
        }
    }

    pub fn order_updated(order: &Order) -> Self {
        Self {
            topic: Topic::OrderUpdated,
            key: order.id.to_string(),
            payload: json!({
                "order_id": order.id,
                "status": order.status,
            }),
        }
    }

    pub fn payment_status(payment: &Payment) -> Self {
        Self {
            topic: Topic::PaymentStatus,
            key: payment.id.to_string(),
            payload: json!({
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "status": payment.status,
            }),
        }
    }
}

/// Accepts notifications without blocking the caller.
pub trait EventNotifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// The external channel notifications are delivered to.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sink that writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            topic = %notification.topic,
            key = %notification.key,
            payload = %notification.payload,
            "Notification emitted"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Delivers notifications to a sink on a spawned task, retrying with
/// exponential backoff.
pub struct BackgroundNotifier<K: EventSink> {
    sink: Arc<K>,
    policy: RetryPolicy,
}

impl<K: EventSink> BackgroundNotifier<K> {
    pub fn new(sink: K, policy: RetryPolicy) -> Self {
        Self {
            sink: Arc::new(sink),
            policy,
        }
    }

    /// Spawns delivery of one notification. The task resolves to whether
    /// delivery eventually succeeded.
    ///
    /// Returns `None`, dropping the notification, when called outside a
    /// Tokio runtime.
    pub fn dispatch(&self, notification: Notification) -> Option<JoinHandle<bool>> {
        match Handle::try_current() {
            Ok(handle) => Some(handle.spawn(deliver_with_retry(
                self.sink.clone(),
                self.policy,
                notification,
            ))),
            Err(_) => {
                warn!(
                    topic = %notification.topic,
                    key = %notification.key,
                    "No async runtime, dropping notification"
                );
                metrics::counter!("notifications_failed_total", "topic" => notification.topic.as_str())
                    .increment(1);
                None
            }
        }
    }
}

impl<K: EventSink> EventNotifier for BackgroundNotifier<K> {
    fn notify(&self, notification: Notification) {
        let _ = self.dispatch(notification);
    }
}

async fn deliver_with_retry<K: EventSink>(
    sink: Arc<K>,
    policy: RetryPolicy,
    notification: Notification,
) -> bool {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match sink.deliver(&notification).await {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    topic = %notification.topic,
                    key = %notification.key,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Notification delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    topic = %notification.topic,
                    key = %notification.key,
                    attempts,
                    error = %e,
                    "Notification delivery failed, giving up"
                );
            }
        }
    }
    metrics::counter!("notifications_failed_total", "topic" => notification.topic.as_str())
        .increment(1);
    false
}

/// Notifier that records every notification in memory. For tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.notifications().iter().map(|n| n.topic).collect()
    }
}

impl EventNotifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
