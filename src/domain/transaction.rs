//! Wallet ledger entry.
//! `amount_usd` is the signed effect on the wallet; a user's balance is the sum of the
//! amounts of their completed transactions.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Deposit,
    OverpaymentCredit,
    UnderpaymentCredit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Deposit => "deposit",
            TransactionKind::OverpaymentCredit => "overpayment_credit",
            TransactionKind::UnderpaymentCredit => "underpayment_credit",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionKind::Purchase),
            "deposit" => Ok(TransactionKind::Deposit),
            "overpayment_credit" => Ok(TransactionKind::OverpaymentCredit),
            "underpayment_credit" => Ok(TransactionKind::UnderpaymentCredit),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Domain entity representing a ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub telegram_id: i64,
    pub order_id: Option<Uuid>,
    pub amount_usd: BigDecimal,
    /// USD value of the payment that produced this entry.
    pub gross_usd: BigDecimal,
    pub crypto_amount: Option<BigDecimal>,
    pub tx_hash: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn completed(
        telegram_id: i64,
        order_id: Option<Uuid>,
        kind: TransactionKind,
        amount_usd: BigDecimal,
        gross_usd: BigDecimal,
        crypto_amount: Option<BigDecimal>,
        tx_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            telegram_id,
            order_id,
            amount_usd,
            gross_usd,
            crypto_amount,
            tx_hash,
            kind,
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        }
    }
}
