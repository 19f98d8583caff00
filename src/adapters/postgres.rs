//! Postgres implementation of the storage ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, RegisteredDomain, SagaCheckpoint, Transaction};
use crate::gateway::ServiceHealth;
use crate::ports::{
    CustomerRepository, DomainRepository, HealthRepository, LedgerRepository, LedgerWrite,
    OrderRepository, OrderSettlement, RepositoryError, RepositoryResult,
};

const ORDER_COLUMNS: &str = "order_id, telegram_id, domain_name, tld, expected_amount_usd, \
     payment_method, crypto_currency, crypto_amount, payment_address, status, checkpoint, \
     created_at, updated_at, completed_at";

const TRANSACTION_COLUMNS: &str = "id, telegram_id, order_id, amount_usd, gross_usd, \
     crypto_amount, tx_hash, kind, status, created_at";

const DOMAIN_COLUMNS: &str = "id, order_id, telegram_id, domain_name, registrar_domain_id, \
     dns_zone_id, nameservers, expires_at, created_at, updated_at";

/// Postgres-backed store for orders, domains, the ledger, customers and health.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Inserts the entry unless its `tx_hash` exists. Returns whether a row was written.
async fn insert_transaction(conn: &mut PgConnection, tx: &Transaction) -> RepositoryResult<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO transactions (
            id, telegram_id, order_id, amount_usd, gross_usd,
            crypto_amount, tx_hash, kind, status, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (tx_hash) DO NOTHING
        "#,
    )
    .bind(tx.id)
    .bind(tx.telegram_id)
    .bind(tx.order_id)
    .bind(&tx.amount_usd)
    .bind(&tx.gross_usd)
    .bind(&tx.crypto_amount)
    .bind(&tx.tx_hash)
    .bind(tx.kind.as_str())
    .bind(tx.status.as_str())
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await
    .map_err(RepositoryError::from)?
    .rows_affected();

    Ok(inserted == 1)
}

async fn apply_settlement(conn: &mut PgConnection, settle: &OrderSettlement) -> RepositoryResult<bool> {
    let moved = sqlx::query(
        "UPDATE orders SET status = $1, updated_at = NOW() WHERE order_id = $2 AND status = $3",
    )
    .bind(settle.to.as_str())
    .bind(settle.order_id)
    .bind(settle.from.as_str())
    .execute(&mut *conn)
    .await
    .map_err(RepositoryError::from)?
    .rows_affected();

    Ok(moved == 1)
}

async fn completed_balance(conn: &mut PgConnection, telegram_id: i64) -> RepositoryResult<BigDecimal> {
    sqlx::query_scalar::<_, BigDecimal>(
        "SELECT COALESCE(SUM(amount_usd), 0) FROM transactions \
         WHERE telegram_id = $1 AND status = 'completed'",
    )
    .bind(telegram_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(RepositoryError::from)
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn insert_order(&self, order: &Order) -> RepositoryResult<()> {
        let checkpoint = serde_json::to_value(&order.checkpoint)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, telegram_id, domain_name, tld, expected_amount_usd,
                payment_method, crypto_currency, crypto_amount, payment_address, status,
                checkpoint, created_at, updated_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.order_id)
        .bind(order.telegram_id)
        .bind(&order.domain_name)
        .bind(&order.tld)
        .bind(&order.expected_amount_usd)
        .bind(order.payment_method.as_str())
        .bind(&order.crypto_currency)
        .bind(&order.crypto_amount)
        .bind(&order.payment_address)
        .bind(order.status.as_str())
        .bind(checkpoint)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> RepositoryResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))?
            .into_domain()
    }

    async fn find_order_by_address(&self, address: &str) -> RepositoryResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE payment_address = $1",
            ORDER_COLUMNS
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn orders_in_status(&self, status: OrderStatus) -> RepositoryResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE status = $1 ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        checkpoint: &SagaCheckpoint,
    ) -> RepositoryResult<bool> {
        if !from.can_advance_to(to) {
            return Ok(false);
        }
        let checkpoint = serde_json::to_value(checkpoint)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        let moved = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1,
                checkpoint = $2,
                updated_at = NOW(),
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END
            WHERE order_id = $4 AND status = $5
            "#,
        )
        .bind(to.as_str())
        .bind(checkpoint)
        .bind(to.is_terminal())
        .bind(order_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if moved == 1 {
            return Ok(true);
        }

        // Distinguish a lost race from a missing order.
        self.get_order(order_id).await?;
        Ok(false)
    }
}

#[async_trait]
impl DomainRepository for PostgresStore {
    async fn insert_domain(&self, domain: &RegisteredDomain) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO registered_domains (
                id, order_id, telegram_id, domain_name, registrar_domain_id,
                dns_zone_id, nameservers, expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(domain.id)
        .bind(domain.order_id)
        .bind(domain.telegram_id)
        .bind(&domain.domain_name)
        .bind(&domain.registrar_domain_id)
        .bind(&domain.dns_zone_id)
        .bind(&domain.nameservers)
        .bind(domain.expires_at)
        .bind(domain.created_at)
        .bind(domain.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return RepositoryError::Conflict(format!(
                        "domain for order {}",
                        domain.order_id
                    ));
                }
            }
            RepositoryError::from(e)
        })?;

        Ok(())
    }

    async fn find_domain_by_order(&self, order_id: Uuid) -> RepositoryResult<Option<RegisteredDomain>> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {} FROM registered_domains WHERE order_id = $1",
            DOMAIN_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(DomainRow::into_domain))
    }

    async fn update_nameservers(&self, domain_id: Uuid, nameservers: &[String]) -> RepositoryResult<()> {
        let updated = sqlx::query(
            "UPDATE registered_domains SET nameservers = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(nameservers)
        .bind(domain_id)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("domain {}", domain_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PostgresStore {
    async fn record(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite> {
        let mut db_tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        if !insert_transaction(&mut db_tx, tx).await? {
            db_tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(LedgerWrite::Duplicate);
        }
        if let Some(settle) = &settle {
            if !apply_settlement(&mut db_tx, settle).await? {
                db_tx.rollback().await.map_err(RepositoryError::from)?;
                return Ok(LedgerWrite::OrderMoved);
            }
        }

        db_tx.commit().await.map_err(RepositoryError::from)?;
        Ok(LedgerWrite::Recorded)
    }

    async fn debit(
        &self,
        tx: &Transaction,
        settle: Option<OrderSettlement>,
    ) -> RepositoryResult<LedgerWrite> {
        let mut db_tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // Serializes balance checks per user until commit.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(tx.telegram_id)
            .execute(&mut *db_tx)
            .await
            .map_err(RepositoryError::from)?;

        let balance = completed_balance(&mut db_tx, tx.telegram_id).await?;
        if &balance + &tx.amount_usd < BigDecimal::from(0) {
            db_tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(LedgerWrite::InsufficientFunds { balance });
        }

        if !insert_transaction(&mut db_tx, tx).await? {
            db_tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(LedgerWrite::Duplicate);
        }
        if let Some(settle) = &settle {
            if !apply_settlement(&mut db_tx, settle).await? {
                db_tx.rollback().await.map_err(RepositoryError::from)?;
                return Ok(LedgerWrite::OrderMoved);
            }
        }

        db_tx.commit().await.map_err(RepositoryError::from)?;
        Ok(LedgerWrite::Recorded)
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE tx_hash = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn balance(&self, telegram_id: i64) -> RepositoryResult<BigDecimal> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        completed_balance(&mut conn, telegram_id).await
    }

    async fn transactions_for(&self, telegram_id: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE telegram_id = $1 ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(telegram_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl CustomerRepository for PostgresStore {
    async fn find_customer(&self, telegram_id: i64) -> RepositoryResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT customer_id FROM registrar_customers WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)
    }

    async fn save_customer(&self, telegram_id: i64, customer_id: &str) -> RepositoryResult<String> {
        // The no-op update makes RETURNING yield the stored id on conflict.
        sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO registrar_customers (telegram_id, customer_id)
            VALUES ($1, $2)
            ON CONFLICT (telegram_id) DO UPDATE SET telegram_id = EXCLUDED.telegram_id
            RETURNING customer_id
            "#,
        )
        .bind(telegram_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)
    }
}

#[async_trait]
impl HealthRepository for PostgresStore {
    async fn save_health(&self, health: &ServiceHealth) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_health (
                service_name, failure_count, status, circuit_open_until,
                last_success, last_failure, avg_latency_ms, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (service_name) DO UPDATE SET
                failure_count = EXCLUDED.failure_count,
                status = EXCLUDED.status,
                circuit_open_until = EXCLUDED.circuit_open_until,
                last_success = EXCLUDED.last_success,
                last_failure = EXCLUDED.last_failure,
                avg_latency_ms = EXCLUDED.avg_latency_ms,
                updated_at = NOW()
            "#,
        )
        .bind(&health.service_name)
        .bind(health.failure_count as i32)
        .bind(health.status.as_str())
        .bind(health.circuit_open_until)
        .bind(health.last_success)
        .bind(health.last_failure)
        .bind(health.avg_latency_ms.map(|ms| ms as i64))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: Uuid,
    telegram_id: i64,
    domain_name: String,
    tld: String,
    expected_amount_usd: BigDecimal,
    payment_method: String,
    crypto_currency: Option<String>,
    crypto_amount: Option<BigDecimal>,
    payment_address: Option<String>,
    status: String,
    checkpoint: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_domain(self) -> RepositoryResult<Order> {
        Ok(Order {
            order_id: self.order_id,
            telegram_id: self.telegram_id,
            domain_name: self.domain_name,
            tld: self.tld,
            expected_amount_usd: self.expected_amount_usd,
            payment_method: self.payment_method.parse().map_err(RepositoryError::Corrupt)?,
            crypto_currency: self.crypto_currency,
            crypto_amount: self.crypto_amount,
            payment_address: self.payment_address,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            checkpoint: serde_json::from_value(self.checkpoint)
                .map_err(|e| RepositoryError::Corrupt(format!("checkpoint: {}", e)))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    telegram_id: i64,
    order_id: Option<Uuid>,
    amount_usd: BigDecimal,
    gross_usd: BigDecimal,
    crypto_amount: Option<BigDecimal>,
    tx_hash: String,
    kind: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            telegram_id: self.telegram_id,
            order_id: self.order_id,
            amount_usd: self.amount_usd,
            gross_usd: self.gross_usd,
            crypto_amount: self.crypto_amount,
            tx_hash: self.tx_hash,
            kind: self.kind.parse().map_err(RepositoryError::Corrupt)?,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: Uuid,
    order_id: Uuid,
    telegram_id: i64,
    domain_name: String,
    registrar_domain_id: String,
    dns_zone_id: Option<String>,
    nameservers: Vec<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DomainRow {
    fn into_domain(self) -> RegisteredDomain {
        RegisteredDomain {
            id: self.id,
            order_id: self.order_id,
            telegram_id: self.telegram_id,
            domain_name: self.domain_name,
            registrar_domain_id: self.registrar_domain_id,
            dns_zone_id: self.dns_zone_id,
            nameservers: self.nameservers,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
