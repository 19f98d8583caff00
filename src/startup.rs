use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{MemoryStore, PostgresStore};
use crate::config::Config;
use crate::events::EventSink;
use crate::gateway::{spawn_health_persister, ResilientGateway, ServiceHealthTracker};
use crate::payments::{spawn_payment_monitor, PaymentMonitor, PaymentReconciler};
use crate::ports::{
    CustomerRepository, DomainRepository, HealthRepository, LedgerRepository, OrderRepository,
};
use crate::providers::{
    blockbee::BlockBeeClient, cloudflare::CloudflareClient, openprovider::OpenProviderClient,
    DnsProvider, PaymentGateway, Registrar,
};
use crate::saga::{BackgroundRegistrations, PricingPolicy, RegistrationOrchestrator};
use crate::services::{CheckoutService, NameserverService};
use crate::AppState;

const HEALTH_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Repositories behind the ports, all backed by the same store.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub domains: Arc<dyn DomainRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub health: Arc<dyn HealthRepository>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            orders: store.clone(),
            domains: store.clone(),
            ledger: store.clone(),
            customers: store.clone(),
            health: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PostgresStore::new(pool));
        Self {
            orders: store.clone(),
            domains: store.clone(),
            ledger: store.clone(),
            customers: store.clone(),
            health: store,
        }
    }
}

#[derive(Clone)]
pub struct Providers {
    pub dns: Arc<dyn DnsProvider>,
    pub registrar: Arc<dyn Registrar>,
    pub payments: Arc<dyn PaymentGateway>,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dns: Arc::new(CloudflareClient::new(
                config.cloudflare.base_url.clone(),
                config.cloudflare.api_token.clone(),
                config.cloudflare.account_id.clone(),
            )),
            registrar: Arc::new(OpenProviderClient::new(
                config.openprovider.base_url.clone(),
                config.openprovider.username.clone(),
                config.openprovider.password.clone(),
            )),
            payments: Arc::new(BlockBeeClient::new(
                config.blockbee.base_url.clone(),
                config.blockbee.api_key.clone(),
            )),
        }
    }
}

pub fn build_gateway(config: &Config, tracker: Arc<ServiceHealthTracker>) -> ResilientGateway {
    config
        .policies
        .iter()
        .fold(ResilientGateway::new(tracker), |gateway, (service, policy)| {
            gateway.with_policy(service, policy.clone())
        })
        .with_fallback_policy(config.default_policy.clone())
}

/// Wires the saga, the reconciler, checkout and nameserver updates over the given stores
/// and providers.
pub fn build_state(
    config: &Config,
    stores: &Stores,
    providers: &Providers,
    gateway: Arc<ResilientGateway>,
    events: Arc<dyn EventSink>,
) -> AppState {
    let orchestrator = Arc::new(
        RegistrationOrchestrator::new(
            gateway.clone(),
            providers.dns.clone(),
            providers.registrar.clone(),
            stores.orders.clone(),
            stores.domains.clone(),
            stores.customers.clone(),
            events.clone(),
        )
        .with_server_ip(config.server_public_ip.clone())
        .with_fallback_nameservers(config.fallback_nameservers.clone()),
    );

    let reconciler = Arc::new(PaymentReconciler::new(
        stores.orders.clone(),
        stores.ledger.clone(),
        events,
        Arc::new(BackgroundRegistrations::new(orchestrator)),
    ));

    let checkout = Arc::new(CheckoutService::new(
        gateway.clone(),
        providers.registrar.clone(),
        providers.payments.clone(),
        stores.orders.clone(),
        Arc::new(PricingPolicy::new(config.price_multiplier.clone())),
        config.public_base_url.clone(),
    ));

    let nameservers = Arc::new(NameserverService::new(
        gateway.clone(),
        providers.registrar.clone(),
        stores.domains.clone(),
    ));

    AppState {
        checkout,
        nameservers,
        reconciler,
        orders: stores.orders.clone(),
        domains: stores.domains.clone(),
        ledger: stores.ledger.clone(),
        gateway,
        payments: providers.payments.clone(),
        webhook_secret: config.webhook_secret.clone(),
        min_confirmations: config.min_confirmations.clone(),
    }
}

/// Starts copying gateway health into the store in the background.
pub fn start_health_persister(tracker: Arc<ServiceHealthTracker>, stores: &Stores) {
    spawn_health_persister(tracker, stores.health.clone(), HEALTH_PERSIST_INTERVAL);
}

/// Starts polling pending crypto orders, unless polling is switched off.
pub fn start_payment_monitor(config: &Config, state: &AppState) {
    let every = match config.payment_poll_interval {
        Some(every) => every,
        None => {
            tracing::info!("payment polling disabled, relying on webhooks");
            return;
        }
    };
    let monitor = Arc::new(PaymentMonitor::new(
        state.orders.clone(),
        state.reconciler.clone(),
        state.gateway.clone(),
        state.payments.clone(),
        state.min_confirmations.clone(),
        config.public_base_url.clone(),
    ));
    spawn_payment_monitor(monitor, every);
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: Option<bool>,
    pub providers: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database.unwrap_or(true) && self.providers
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        match self.database {
            Some(ok) => println!("Database Connectivity: {}", status(ok)),
            None => println!("Database Connectivity: - (not configured)"),
        }
        println!("Provider Credentials:  {}", status(self.providers));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: Option<&PgPool>) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: None,
        providers: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Some(pool) = pool {
        let result = validate_database(pool).await;
        report.database = Some(result.is_ok());
        if let Err(e) = result {
            report.errors.push(format!("Database: {}", e));
        }
    }

    let missing = config.missing_credentials();
    if !missing.is_empty() {
        report.providers = false;
        report
            .errors
            .push(format!("Providers: missing {}", missing.join(", ")));
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.webhook_secret.len() < 16 {
        anyhow::bail!("PAYMENT_WEBHOOK_SECRET should be at least 16 characters");
    }

    for (name, value) in [
        ("CLOUDFLARE_BASE_URL", &config.cloudflare.base_url),
        ("OPENPROVIDER_BASE_URL", &config.openprovider.base_url),
        ("BLOCKBEE_BASE_URL", &config.blockbee.base_url),
    ] {
        url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}
