//! Payment reconciliation and the wallet ledger.

pub mod monitor;
pub mod reconciler;
pub mod valuation;
pub mod wallet;

use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::OrderStatus;
use crate::ports::RepositoryError;

pub use monitor::{spawn_payment_monitor, PaymentMonitor, PollSummary};
pub use reconciler::{
    classify, Classification, PaymentReceipt, PaymentReconciler, ReconciliationResult,
};
pub use valuation::usd_value;
pub use wallet::WalletPayment;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: {required} USD required, balance is {balance} USD")]
    InsufficientFunds {
        required: BigDecimal,
        balance: BigDecimal,
    },

    #[error("order is not awaiting payment (status {0})")]
    NotPayable(OrderStatus),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
