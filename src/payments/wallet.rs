use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{PaymentReconciler, ReconcileError};
use crate::domain::{OrderStatus, Transaction, TransactionKind};
use crate::events::DomainEvent;
use crate::ports::{LedgerWrite, OrderSettlement};

#[derive(Debug, Clone, Serialize)]
pub struct WalletPayment {
    pub transaction: Transaction,
    pub balance: BigDecimal,
}

/// Ledger key for a wallet-funded purchase; one per order.
fn wallet_tx_hash(order_id: Uuid) -> String {
    format!("wallet:{}", order_id)
}

impl PaymentReconciler {
    /// Pays an order awaiting payment from the user's wallet, then hands it to the saga.
    pub async fn pay_from_wallet(&self, order_id: Uuid) -> Result<WalletPayment, ReconcileError> {
        let (payment, telegram_id) = {
            let _guard = self.locks.lock(order_id).await;

            let order = self.load(order_id).await?;
            if order.status != OrderStatus::AwaitingPayment {
                return Err(ReconcileError::NotPayable(order.status));
            }

            let price = order.expected_amount_usd.clone();
            let tx = Transaction::completed(
                order.telegram_id,
                Some(order_id),
                TransactionKind::Purchase,
                -price.clone(),
                price.clone(),
                None,
                wallet_tx_hash(order_id),
            );
            let settle = OrderSettlement {
                order_id,
                from: OrderStatus::AwaitingPayment,
                to: OrderStatus::PaymentConfirmed,
            };

            match self.ledger.debit(&tx, Some(settle)).await? {
                LedgerWrite::Recorded => {}
                LedgerWrite::InsufficientFunds { balance } => {
                    return Err(ReconcileError::InsufficientFunds {
                        required: price,
                        balance,
                    });
                }
                LedgerWrite::Duplicate | LedgerWrite::OrderMoved => {
                    let current = self.load(order_id).await?;
                    return Err(ReconcileError::NotPayable(current.status));
                }
            }

            let balance = self.ledger.balance(order.telegram_id).await?;
            info!(
                order_id = %order_id,
                telegram_id = order.telegram_id,
                amount = %price,
                balance = %balance,
                "order paid from wallet"
            );
            self.events.publish(DomainEvent::PaymentConfirmed {
                telegram_id: order.telegram_id,
                order_id,
                domain_name: order.domain_name.clone(),
                amount_usd: price,
                tx_hash: tx.tx_hash.clone(),
            });

            (
                WalletPayment {
                    transaction: tx,
                    balance,
                },
                order.telegram_id,
            )
        };

        tracing::debug!(order_id = %order_id, telegram_id, "triggering registration");
        self.trigger.trigger(order_id).await;
        Ok(payment)
    }
}
