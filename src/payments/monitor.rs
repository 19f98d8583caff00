use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{usd_value, PaymentReceipt, PaymentReconciler, ReconcileError, ReconciliationResult};
use crate::config::MinConfirmations;
use crate::domain::{Order, OrderStatus, PaymentMethod};
use crate::gateway::{services, GatewayError, ResilientGateway};
use crate::ports::OrderRepository;
use crate::providers::PaymentGateway;
use crate::services::payment_callback_url;

/// Counts from one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Orders whose payment address was looked up.
    pub checked: usize,
    /// Payments that changed the ledger.
    pub reconciled: usize,
    /// Payments seen without enough confirmations yet.
    pub pending: usize,
    pub errors: usize,
}

#[derive(Error, Debug)]
enum PollError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Asks the payment processor about crypto orders still awaiting payment, for when a
/// webhook never arrives. Payments go through the same reconciler as webhooks, so a
/// payment reported both ways is recorded once.
pub struct PaymentMonitor {
    orders: Arc<dyn OrderRepository>,
    reconciler: Arc<PaymentReconciler>,
    gateway: Arc<ResilientGateway>,
    payments: Arc<dyn PaymentGateway>,
    min_confirmations: MinConfirmations,
    public_base_url: String,
}

impl PaymentMonitor {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        reconciler: Arc<PaymentReconciler>,
        gateway: Arc<ResilientGateway>,
        payments: Arc<dyn PaymentGateway>,
        min_confirmations: MinConfirmations,
        public_base_url: String,
    ) -> Self {
        Self {
            orders,
            reconciler,
            gateway,
            payments,
            min_confirmations,
            public_base_url,
        }
    }

    /// One pass over every pending crypto order. A failing order is logged and skipped.
    pub async fn check_pending(&self) -> Result<PollSummary, ReconcileError> {
        let awaiting = self
            .orders
            .orders_in_status(OrderStatus::AwaitingPayment)
            .await?;

        let mut summary = PollSummary::default();
        for order in awaiting {
            let currency = match (&order.payment_method, order.crypto_currency.clone()) {
                (PaymentMethod::Crypto, Some(currency)) if order.payment_address.is_some() => {
                    currency
                }
                _ => continue,
            };

            summary.checked += 1;
            if let Err(e) = self.check_order(&order, &currency, &mut summary).await {
                summary.errors += 1;
                warn!(order_id = %order.order_id, error = %e, "payment poll failed for order");
            }
        }

        if summary.reconciled > 0 || summary.errors > 0 {
            info!(
                checked = summary.checked,
                reconciled = summary.reconciled,
                pending = summary.pending,
                errors = summary.errors,
                "payment poll finished"
            );
        }
        Ok(summary)
    }

    async fn check_order(
        &self,
        order: &Order,
        currency: &str,
        summary: &mut PollSummary,
    ) -> Result<(), PollError> {
        let callback = payment_callback_url(&self.public_base_url, order.order_id);
        let payments = &self.payments;
        let received = self
            .gateway
            .execute(services::PAYMENTS, || payments.payments_received(currency, &callback))
            .await?;

        let required = self.min_confirmations.required(currency);
        for payment in received {
            if payment.confirmations < required {
                debug!(
                    order_id = %order.order_id,
                    tx_hash = %payment.tx_hash,
                    confirmations = payment.confirmations,
                    required,
                    "payment seen, waiting for confirmations"
                );
                summary.pending += 1;
                continue;
            }

            let amount_usd = usd_value(
                &self.gateway,
                self.payments.as_ref(),
                currency,
                &payment.value_coin,
                None,
            )
            .await?;

            let result = self
                .reconciler
                .reconcile(PaymentReceipt {
                    order_id: order.order_id,
                    tx_hash: payment.tx_hash.clone(),
                    amount_usd,
                    crypto_amount: Some(payment.value_coin.clone()),
                })
                .await?;

            if !matches!(result, ReconciliationResult::Duplicate) {
                info!(order_id = %order.order_id, tx_hash = %payment.tx_hash, "payment picked up by polling");
                summary.reconciled += 1;
            }
        }
        Ok(())
    }
}

/// Polls on an interval until the runtime shuts down.
pub fn spawn_payment_monitor(monitor: Arc<PaymentMonitor>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "payment monitor started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = monitor.check_pending().await {
                warn!(error = %e, "payment poll could not list pending orders");
            }
        }
    })
}
