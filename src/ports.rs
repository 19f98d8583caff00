//! Storage ports.
//! The saga and the reconciler only talk to persistence through these traits; the
//! Postgres and in-memory adapters live in `crate::adapters`.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, RegisteredDomain, SagaCheckpoint, Transaction};
use crate::gateway::ServiceHealth;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Moves an order out of `from` in the same write that records a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSettlement {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Result of writing a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    Recorded,
    /// An entry with the same `tx_hash` already exists; nothing was written.
    Duplicate,
    /// The settlement's order was no longer in `from`; nothing was written.
    OrderMoved,
    /// A debit would have taken the balance below zero; nothing was written.
    InsufficientFunds { balance: BigDecimal },
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> RepositoryResult<()>;

    async fn get_order(&self, order_id: Uuid) -> RepositoryResult<Order>;

    async fn find_order_by_address(&self, address: &str) -> RepositoryResult<Option<Order>>;

    /// Orders currently in `status`, oldest first.
    async fn orders_in_status(&self, status: OrderStatus) -> RepositoryResult<Vec<Order>>;

    /// Compare-and-set on the status. Returns `false` without writing when the stored
    /// status is not `from`. Sets `completed_at` when `to` is terminal.
    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        checkpoint: &SagaCheckpoint,
    ) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait DomainRepository: Send + Sync {
    async fn insert_domain(&self, domain: &RegisteredDomain) -> RepositoryResult<()>;

    async fn find_domain_by_order(&self, order_id: Uuid)
        -> RepositoryResult<Option<RegisteredDomain>>;

    async fn update_nameservers(&self, domain_id: Uuid, nameservers: &[String])
        -> RepositoryResult<()>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Records a credit (or a zero-delta purchase), optionally settling an order atomically.
    async fn record(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite>;

    /// Records a negative entry only if the user's balance covers it.
    async fn debit(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite>;

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Transaction>>;

    /// Sum of completed transaction amounts for the user.
    async fn balance(&self, telegram_id: i64) -> RepositoryResult<BigDecimal>;

    async fn transactions_for(&self, telegram_id: i64) -> RepositoryResult<Vec<Transaction>>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_customer(&self, telegram_id: i64) -> RepositoryResult<Option<String>>;

    /// Stores the mapping; when one already exists the stored id wins and is returned.
    async fn save_customer(&self, telegram_id: i64, customer_id: &str) -> RepositoryResult<String>;
}

#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn save_health(&self, health: &ServiceHealth) -> RepositoryResult<()>;
}
