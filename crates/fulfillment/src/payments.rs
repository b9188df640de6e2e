//! Payment lifecycle.
//!
//! A payment's status change and the order status change it implies are
//! written in one unit of work. If the order cannot make the implied
//! transition, nothing is persisted.

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, OrderStatus, PaymentId, PaymentStatus};
use domain::{CommerceError, InventoryLedger, Result, ensure_transition};
use storage::{CacheAsideStore, EntityKind, NewPayment, Payment, PaymentMethod, RecordStore, StoreError};
use tracing::info;

use crate::notifier::{EventNotifier, Notification};
use crate::orders::apply_order_transition;

pub const DEFAULT_CURRENCY: &str = "USD";

/// The order status a payment status drives its order to.
fn implied_order_status(status: PaymentStatus) -> Option<OrderStatus> {
    match status {
        PaymentStatus::Completed => Some(OrderStatus::Processing),
        PaymentStatus::Failed | PaymentStatus::Refunded => Some(OrderStatus::Cancelled),
        PaymentStatus::Pending => None,
    }
}

pub struct PaymentLifecycle<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
    inventory: InventoryLedger<S>,
    notifier: Arc<dyn EventNotifier>,
    currency: String,
}

impl<S: RecordStore> PaymentLifecycle<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self {
            inventory: InventoryLedger::new(store.clone()),
            store,
            notifier,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    /// Sets the currency recorded on new payments.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Creates a `Pending` payment for an order.
    ///
    /// The amount must equal the order's frozen total, and an order can
    /// have at most one payment.
    #[tracing::instrument(skip(self))]
    pub async fn create_payment(
        &self,
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Payment> {
        let mut uow = self.store.begin().await?;
        let order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Order, order_id))?;

        if order.payment_id.is_some() {
            return Err(CommerceError::DuplicatePayment { order_id });
        }
        if amount != order.total_amount {
            return Err(CommerceError::AmountMismatch {
                expected: order.total_amount,
                actual: amount,
            });
        }

        let payment = uow
            .insert_payment(NewPayment {
                order_id,
                amount,
                currency: self.currency.clone(),
                method,
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate {
                    entity: EntityKind::Payment,
                    ..
                } => CommerceError::DuplicatePayment { order_id },
                other => other.into(),
            })?;
        uow.attach_payment(order_id, payment.id).await?;
        uow.commit().await?;

        info!(payment_id = %payment.id, order_id = %order_id, amount = %amount, "Payment created");
        self.notifier.notify(Notification::payment_status(&payment));
        Ok(payment)
    }

    /// Completes a `Pending` payment and moves its order to `Processing`.
    #[tracing::instrument(skip(self))]
    pub async fn process_payment(&self, payment_id: PaymentId, transaction_id: &str) -> Result<Payment> {
        let transaction_id = transaction_id.trim();
        if transaction_id.is_empty() {
            return Err(CommerceError::validation("transaction_id", "must not be empty"));
        }
        self.transition(
            payment_id,
            PaymentStatus::Completed,
            Some(transaction_id.to_string()),
        )
        .await
    }

    /// Applies a validated payment status change and its order side effect.
    ///
    /// `Completed` moves the order to `Processing`; `Failed` and `Refunded`
    /// cancel it and restore its stock.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, payment_id: PaymentId, status: PaymentStatus) -> Result<Payment> {
        self.transition(payment_id, status, None).await
    }

    /// Refunds a `Completed` payment, cancelling its order and restoring stock.
    #[tracing::instrument(skip(self))]
    pub async fn refund_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.transition(payment_id, PaymentStatus::Refunded, None)
            .await
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.store
            .payment(payment_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Payment, payment_id))
    }

    pub async fn payment_for_order(&self, order_id: OrderId) -> Result<Payment> {
        self.store
            .payment_for_order(order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Payment, order_id))
    }

    async fn transition(
        &self,
        payment_id: PaymentId,
        to: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Payment> {
        let mut uow = self.store.begin().await?;
        let mut payment = uow
            .payment(payment_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Payment, payment_id))?;
        ensure_transition(payment.status, to)?;

        let order = uow
            .order(payment.order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::Order, payment.order_id))?;

        payment.status = to;
        if to == PaymentStatus::Completed {
            payment.payment_date = Some(Utc::now());
            if transaction_id.is_some() {
                payment.transaction_id = transaction_id;
            }
        }
        let payment = uow.update_payment(&payment).await?;

        let order_update = match implied_order_status(to) {
            Some(target) => Some(
                apply_order_transition(&self.inventory, &mut uow, &order, target, true).await?,
            ),
            None => None,
        };
        uow.commit().await?;

        match to {
            PaymentStatus::Refunded => metrics::counter!("payments_refunded_total").increment(1),
            status => metrics::counter!("payments_processed_total", "status" => status.as_str())
                .increment(1),
        }
        info!(payment_id = %payment.id, status = %payment.status, "Payment status changed");

        self.notifier.notify(Notification::payment_status(&payment));
        if let Some(order) = order_update.filter(|updated| updated.status != order.status) {
            self.notifier.notify(Notification::order_updated(&order));
        }
        Ok(payment)
    }
}
