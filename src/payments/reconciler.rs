use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::ReconcileError;
use crate::domain::money::{is_positive, round_cents};
use crate::domain::{Order, OrderStatus, Transaction, TransactionKind};
use crate::events::{DomainEvent, EventSink};
use crate::ports::{LedgerRepository, LedgerWrite, OrderRepository, OrderSettlement, RepositoryError};
use crate::saga::{KeyedLocks, RegistrationTrigger};

/// A confirmed on-chain payment for an order, valued in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub order_id: Uuid,
    pub tx_hash: String,
    pub amount_usd: BigDecimal,
    pub crypto_amount: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    ExactMatch,
    Overpaid { excess: BigDecimal },
    Underpaid { shortfall: BigDecimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconciliationResult {
    /// The `tx_hash` was already reconciled; nothing changed.
    Duplicate,
    Matched {
        classification: Classification,
        transaction: Transaction,
        registration_triggered: bool,
    },
    /// The order no longer accepted payments; the full amount went to the wallet.
    LateCredit { transaction: Transaction },
    /// Wallet top-up not tied to an order.
    Deposited { transaction: Transaction },
}

/// Compares cent-rounded amounts.
pub fn classify(expected: &BigDecimal, received: &BigDecimal) -> Classification {
    let expected = round_cents(expected);
    let received = round_cents(received);
    if received == expected {
        Classification::ExactMatch
    } else if received > expected {
        Classification::Overpaid {
            excess: round_cents(&(received - expected)),
        }
    } else {
        Classification::Underpaid {
            shortfall: round_cents(&(expected - received)),
        }
    }
}

/// Matches confirmed payments to orders and keeps the wallet ledger.
///
/// `tx_hash` is the idempotency key: one ledger entry per hash, ever. Work on an order
/// happens under that order's lock; the saga is triggered after the lock is released and
/// only by the call that moved the order out of `AwaitingPayment`.
pub struct PaymentReconciler {
    pub(super) orders: Arc<dyn OrderRepository>,
    pub(super) ledger: Arc<dyn LedgerRepository>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) trigger: Arc<dyn RegistrationTrigger>,
    pub(super) locks: KeyedLocks<Uuid>,
}

impl PaymentReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn LedgerRepository>,
        events: Arc<dyn EventSink>,
        trigger: Arc<dyn RegistrationTrigger>,
    ) -> Self {
        Self {
            orders,
            ledger,
            events,
            trigger,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn reconcile(
        &self,
        receipt: PaymentReceipt,
    ) -> Result<ReconciliationResult, ReconcileError> {
        validate(&receipt.tx_hash, &receipt.amount_usd)?;
        let order_id = receipt.order_id;
        let amount = round_cents(&receipt.amount_usd);

        let (result, trigger) = {
            let _guard = self.locks.lock(order_id).await;

            if self.ledger.find_by_tx_hash(&receipt.tx_hash).await?.is_some() {
                info!(order_id = %order_id, tx_hash = %receipt.tx_hash, "payment already reconciled");
                return Ok(ReconciliationResult::Duplicate);
            }

            let order = self.load(order_id).await?;
            if order.status != OrderStatus::AwaitingPayment {
                return self.credit_late(&order, &receipt, amount).await;
            }

            let classification = classify(&order.expected_amount_usd, &amount);
            let settle = OrderSettlement {
                order_id,
                from: OrderStatus::AwaitingPayment,
                to: OrderStatus::PaymentConfirmed,
            };
            let (kind, delta, settle) = match &classification {
                Classification::ExactMatch => {
                    (TransactionKind::Purchase, BigDecimal::zero(), Some(settle))
                }
                Classification::Overpaid { excess } => {
                    (TransactionKind::OverpaymentCredit, excess.clone(), Some(settle))
                }
                Classification::Underpaid { .. } => {
                    (TransactionKind::UnderpaymentCredit, amount.clone(), None)
                }
            };

            let tx = Transaction::completed(
                order.telegram_id,
                Some(order_id),
                kind,
                delta,
                amount.clone(),
                receipt.crypto_amount.clone(),
                receipt.tx_hash.clone(),
            );

            match self.ledger.record(&tx, settle).await? {
                LedgerWrite::Recorded => {}
                LedgerWrite::Duplicate => return Ok(ReconciliationResult::Duplicate),
                LedgerWrite::OrderMoved => {
                    let order = self.load(order_id).await?;
                    return self.credit_late(&order, &receipt, amount).await;
                }
                LedgerWrite::InsufficientFunds { .. } => {
                    return Err(RepositoryError::Conflict(format!(
                        "credit for order {} reported insufficient funds",
                        order_id
                    ))
                    .into());
                }
            }

            self.announce(&order, &classification, &amount, &tx);
            let trigger = settle.is_some();
            (
                ReconciliationResult::Matched {
                    classification,
                    transaction: tx,
                    registration_triggered: trigger,
                },
                trigger,
            )
        };

        if trigger {
            self.trigger.trigger(order_id).await;
        }
        Ok(result)
    }

    /// Hands every order still in `PaymentConfirmed` to the saga. Covers a restart between
    /// the settlement commit and the trigger; the saga's own status check keeps this from
    /// starting a registration twice.
    pub async fn resume_confirmed(&self) -> Result<usize, ReconcileError> {
        let stranded = self
            .orders
            .orders_in_status(OrderStatus::PaymentConfirmed)
            .await?;
        if stranded.is_empty() {
            return Ok(0);
        }

        warn!(count = stranded.len(), "resuming paid orders that never started registration");
        for order in &stranded {
            info!(order_id = %order.order_id, domain = %order.domain_name, "resuming registration");
            self.trigger.trigger(order.order_id).await;
        }
        Ok(stranded.len())
    }

    /// Credits a wallet top-up. Repeating a `tx_hash` is a no-op.
    pub async fn reconcile_deposit(
        &self,
        telegram_id: i64,
        tx_hash: &str,
        amount_usd: &BigDecimal,
        crypto_amount: Option<BigDecimal>,
    ) -> Result<ReconciliationResult, ReconcileError> {
        validate(tx_hash, amount_usd)?;
        let amount = round_cents(amount_usd);
        let tx = Transaction::completed(
            telegram_id,
            None,
            TransactionKind::Deposit,
            amount.clone(),
            amount.clone(),
            crypto_amount,
            tx_hash.to_string(),
        );

        match self.ledger.record(&tx, None).await? {
            LedgerWrite::Recorded => {
                info!(telegram_id, tx_hash = %tx_hash, amount = %amount, "wallet deposit credited");
                self.events.publish(DomainEvent::DepositCredited {
                    telegram_id,
                    order_id: None,
                    amount_usd: amount,
                    tx_hash: tx_hash.to_string(),
                });
                Ok(ReconciliationResult::Deposited { transaction: tx })
            }
            _ => Ok(ReconciliationResult::Duplicate),
        }
    }

    pub(super) async fn load(&self, order_id: Uuid) -> Result<Order, ReconcileError> {
        match self.orders.get_order(order_id).await {
            Ok(order) => Ok(order),
            Err(RepositoryError::NotFound(_)) => Err(ReconcileError::OrderNotFound(order_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn credit_late(
        &self,
        order: &Order,
        receipt: &PaymentReceipt,
        amount: BigDecimal,
    ) -> Result<ReconciliationResult, ReconcileError> {
        warn!(
            order_id = %order.order_id,
            status = %order.status,
            tx_hash = %receipt.tx_hash,
            "payment for an order that no longer awaits payment, crediting wallet"
        );

        let tx = Transaction::completed(
            order.telegram_id,
            Some(order.order_id),
            TransactionKind::Deposit,
            amount.clone(),
            amount.clone(),
            receipt.crypto_amount.clone(),
            receipt.tx_hash.clone(),
        );
        match self.ledger.record(&tx, None).await? {
            LedgerWrite::Recorded => {
                self.events.publish(DomainEvent::DepositCredited {
                    telegram_id: order.telegram_id,
                    order_id: Some(order.order_id),
                    amount_usd: amount,
                    tx_hash: receipt.tx_hash.clone(),
                });
                Ok(ReconciliationResult::LateCredit { transaction: tx })
            }
            _ => Ok(ReconciliationResult::Duplicate),
        }
    }

    fn announce(
        &self,
        order: &Order,
        classification: &Classification,
        amount: &BigDecimal,
        tx: &Transaction,
    ) {
        match classification {
            Classification::Underpaid { shortfall } => {
                info!(order_id = %order.order_id, shortfall = %shortfall, "underpayment credited to wallet");
                self.events.publish(DomainEvent::UnderpaymentCredited {
                    telegram_id: order.telegram_id,
                    order_id: order.order_id,
                    domain_name: order.domain_name.clone(),
                    received_usd: amount.clone(),
                    shortfall_usd: shortfall.clone(),
                    tx_hash: tx.tx_hash.clone(),
                });
            }
            Classification::ExactMatch | Classification::Overpaid { .. } => {
                if let Classification::Overpaid { excess } = classification {
                    info!(order_id = %order.order_id, excess = %excess, "overpayment credited to wallet");
                    self.events.publish(DomainEvent::OverpaymentCredited {
                        telegram_id: order.telegram_id,
                        order_id: order.order_id,
                        domain_name: order.domain_name.clone(),
                        excess_usd: excess.clone(),
                        tx_hash: tx.tx_hash.clone(),
                    });
                }
                info!(order_id = %order.order_id, amount = %amount, "payment confirmed");
                self.events.publish(DomainEvent::PaymentConfirmed {
                    telegram_id: order.telegram_id,
                    order_id: order.order_id,
                    domain_name: order.domain_name.clone(),
                    amount_usd: amount.clone(),
                    tx_hash: tx.tx_hash.clone(),
                });
            }
        }
    }
}

fn validate(tx_hash: &str, amount: &BigDecimal) -> Result<(), ReconcileError> {
    if tx_hash.trim().is_empty() {
        return Err(ReconcileError::InvalidAmount("missing transaction hash".to_string()));
    }
    if !is_positive(&round_cents(amount)) {
        return Err(ReconcileError::InvalidAmount(format!(
            "payment amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn usd(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_classify_exact() {
        assert_eq!(classify(&usd("49.50"), &usd("49.5")), Classification::ExactMatch);
        assert_eq!(classify(&usd("49.50"), &usd("49.501")), Classification::ExactMatch);
    }

    #[test]
    fn test_classify_overpaid() {
        assert_eq!(
            classify(&usd("49.50"), &usd("55.00")),
            Classification::Overpaid { excess: usd("5.50") }
        );
    }

    #[test]
    fn test_classify_underpaid() {
        assert_eq!(
            classify(&usd("49.50"), &usd("41.30")),
            Classification::Underpaid { shortfall: usd("8.20") }
        );
    }

    #[test]
    fn test_validate_rejects_zero_and_blank_hash() {
        assert!(validate("0xabc", &usd("0.001")).is_err());
        assert!(validate("  ", &usd("10")).is_err());
        assert!(validate("0xabc", &usd("10")).is_ok());
    }
}
