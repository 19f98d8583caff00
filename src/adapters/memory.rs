//! In-memory implementation of every storage port.
//! Backs `serve --in-memory` and the test suites. One lock covers all tables, so a ledger
//! write and its order settlement are applied together.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, RegisteredDomain, SagaCheckpoint, Transaction, TransactionStatus};
use crate::gateway::ServiceHealth;
use crate::ports::{
    CustomerRepository, DomainRepository, HealthRepository, LedgerRepository, LedgerWrite,
    OrderRepository, OrderSettlement, RepositoryError, RepositoryResult,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    domains: HashMap<Uuid, RegisteredDomain>,
    transactions: Vec<Transaction>,
    customers: HashMap<i64, String>,
    health: HashMap<String, ServiceHealth>,
}

impl Tables {
    fn balance(&self, telegram_id: i64) -> BigDecimal {
        self.transactions
            .iter()
            .filter(|tx| tx.telegram_id == telegram_id && tx.status == TransactionStatus::Completed)
            .fold(BigDecimal::zero(), |acc, tx| acc + &tx.amount_usd)
    }

    fn has_tx_hash(&self, tx_hash: &str) -> bool {
        self.transactions.iter().any(|tx| tx.tx_hash == tx_hash)
    }

    fn settle(&mut self, settle: &OrderSettlement) -> bool {
        match self.orders.get_mut(&settle.order_id) {
            Some(order) if order.status == settle.from => {
                order.status = settle.to;
                order.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn order_status(&self, settle: &OrderSettlement) -> Option<OrderStatus> {
        self.orders.get(&settle.order_id).map(|o| o.status)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn health_records(&self) -> Vec<ServiceHealth> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables.health.values().cloned().collect();
        records.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        records
    }

    pub async fn domain_count(&self) -> usize {
        self.tables.read().await.domains.len()
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.order_id) {
            return Err(RepositoryError::Conflict(format!("order {}", order.order_id)));
        }
        tables.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> RepositoryResult<Order> {
        self.tables
            .read()
            .await
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))
    }

    async fn find_order_by_address(&self, address: &str) -> RepositoryResult<Option<Order>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .find(|o| o.payment_address.as_deref() == Some(address))
            .cloned())
    }

    async fn orders_in_status(&self, status: OrderStatus) -> RepositoryResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        checkpoint: &SagaCheckpoint,
    ) -> RepositoryResult<bool> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))?;

        if order.status != from || !from.can_advance_to(to) {
            return Ok(false);
        }

        let now = Utc::now();
        order.status = to;
        order.checkpoint = checkpoint.clone();
        order.updated_at = now;
        if to.is_terminal() {
            order.completed_at = Some(now);
        }
        Ok(true)
    }
}

#[async_trait]
impl DomainRepository for MemoryStore {
    async fn insert_domain(&self, domain: &RegisteredDomain) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if tables.domains.values().any(|d| d.order_id == domain.order_id) {
            return Err(RepositoryError::Conflict(format!(
                "domain for order {}",
                domain.order_id
            )));
        }
        tables.domains.insert(domain.id, domain.clone());
        Ok(())
    }

    async fn find_domain_by_order(&self, order_id: Uuid) -> RepositoryResult<Option<RegisteredDomain>> {
        Ok(self
            .tables
            .read()
            .await
            .domains
            .values()
            .find(|d| d.order_id == order_id)
            .cloned())
    }

    async fn update_nameservers(&self, domain_id: Uuid, nameservers: &[String]) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        let domain = tables
            .domains
            .get_mut(&domain_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("domain {}", domain_id)))?;
        domain.nameservers = nameservers.to_vec();
        domain.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn record(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite> {
        let mut tables = self.tables.write().await;
        if tables.has_tx_hash(&tx.tx_hash) {
            return Ok(LedgerWrite::Duplicate);
        }
        if let Some(settle) = &settle {
            if tables.order_status(settle) != Some(settle.from) {
                return Ok(LedgerWrite::OrderMoved);
            }
            tables.settle(settle);
        }
        tables.transactions.push(tx.clone());
        Ok(LedgerWrite::Recorded)
    }

    async fn debit(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite> {
        let mut tables = self.tables.write().await;
        if tables.has_tx_hash(&tx.tx_hash) {
            return Ok(LedgerWrite::Duplicate);
        }
        let balance = tables.balance(tx.telegram_id);
        if &balance + &tx.amount_usd < BigDecimal::zero() {
            return Ok(LedgerWrite::InsufficientFunds { balance });
        }
        if let Some(settle) = &settle {
            if tables.order_status(settle) != Some(settle.from) {
                return Ok(LedgerWrite::OrderMoved);
            }
            tables.settle(settle);
        }
        tables.transactions.push(tx.clone());
        Ok(LedgerWrite::Recorded)
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .iter()
            .find(|tx| tx.tx_hash == tx_hash)
            .cloned())
    }

    async fn balance(&self, telegram_id: i64) -> RepositoryResult<BigDecimal> {
        Ok(self.tables.read().await.balance(telegram_id))
    }

    async fn transactions_for(&self, telegram_id: i64) -> RepositoryResult<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut txs: Vec<_> = tables
            .transactions
            .iter()
            .filter(|tx| tx.telegram_id == telegram_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }
}

#[async_trait]
impl CustomerRepository for MemoryStore {
    async fn find_customer(&self, telegram_id: i64) -> RepositoryResult<Option<String>> {
        Ok(self.tables.read().await.customers.get(&telegram_id).cloned())
    }

    async fn save_customer(&self, telegram_id: i64, customer_id: &str) -> RepositoryResult<String> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .customers
            .entry(telegram_id)
            .or_insert_with(|| customer_id.to_string())
            .clone())
    }
}

#[async_trait]
impl HealthRepository for MemoryStore {
    async fn save_health(&self, health: &ServiceHealth) -> RepositoryResult<()> {
        self.tables
            .write()
            .await
            .health
            .insert(health.service_name.clone(), health.clone());
        Ok(())
    }
}
