use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::events::TracingEventSink;
use crate::gateway::ServiceHealthTracker;
use crate::startup::{self, Providers, Stores};

#[derive(Parser)]
#[command(name = "registrar-core")]
#[command(about = "Registrar Core - domain sales saga, payment reconciliation and resilient provider calls", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Keep orders and the ledger in memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Show the last persisted health of the external services
    Health,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_serve(config: &Config, in_memory: bool) -> anyhow::Result<()> {
    let stores = if in_memory {
        tracing::warn!("running with the in-memory store; nothing survives a restart");
        Stores::memory()
    } else {
        let pool = crate::db::create_pool(config.require_database_url()?).await?;
        crate::db::run_migrations(&pool).await?;
        Stores::postgres(pool)
    };

    let missing = config.missing_credentials();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "provider credentials missing; those calls will be rejected");
    }

    let tracker = Arc::new(ServiceHealthTracker::new());
    let gateway = Arc::new(startup::build_gateway(config, tracker.clone()));
    let providers = Providers::from_config(config);
    let state = startup::build_state(
        config,
        &stores,
        &providers,
        gateway,
        Arc::new(TracingEventSink),
    );
    startup::start_health_persister(tracker, &stores);

    let resumed = state.reconciler.resume_confirmed().await?;
    if resumed > 0 {
        tracing::info!(resumed, "paid orders handed back to registration");
    }
    startup::start_payment_monitor(config, &state);

    let app = crate::create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config.require_database_url()?).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    match &config.database_url {
        Some(url) => println!("  Database URL: {}", mask_password(url)),
        None => println!("  Database URL: (not set)"),
    }
    println!("  Public Base URL: {}", config.public_base_url);
    println!(
        "  Server Public IP: {}",
        config.server_public_ip.as_deref().unwrap_or("(not set, A record skipped)")
    );
    println!("  Fallback Nameservers: {}", config.fallback_nameservers.join(", "));
    println!("  Price Multiplier: {}", config.price_multiplier);

    let mut services: Vec<_> = config.policies.iter().collect();
    services.sort_by(|a, b| a.0.cmp(b.0));
    for (service, policy) in services {
        println!(
            "  Policy {}: {} retries, {:?}, threshold {}, reset {}s, timeout {}s",
            service,
            policy.max_retries,
            policy.backoff,
            policy.circuit_breaker_threshold,
            policy.circuit_reset.as_secs(),
            policy.timeout.as_secs(),
        );
    }

    let pool = match &config.database_url {
        Some(url) => Some(crate::db::create_pool(url).await?),
        None => None,
    };
    let report = startup::validate_environment(config, pool.as_ref()).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    Ok(())
}

#[derive(sqlx::FromRow)]
struct HealthRow {
    service_name: String,
    status: String,
    failure_count: i32,
    circuit_open_until: Option<DateTime<Utc>>,
    avg_latency_ms: Option<i64>,
    updated_at: DateTime<Utc>,
}

pub async fn handle_health(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config.require_database_url()?).await?;
    let rows = fetch_health(&pool).await?;

    if rows.is_empty() {
        println!("No service health recorded yet");
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:<9} {:<12} {:<26} {:<20}",
        "Service", "Status", "Failures", "Latency", "Circuit open until", "Updated"
    );
    println!("{}", "-".repeat(92));

    for row in rows {
        println!(
            "{:<12} {:<10} {:<9} {:<12} {:<26} {:<20}",
            row.service_name,
            row.status,
            row.failure_count,
            row.avg_latency_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            row.circuit_open_until
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

async fn fetch_health(pool: &PgPool) -> Result<Vec<HealthRow>, sqlx::Error> {
    sqlx::query_as::<_, HealthRow>(
        "SELECT service_name, status, failure_count, circuit_open_until, avg_latency_ms, updated_at
         FROM service_health ORDER BY service_name",
    )
    .fetch_all(pool)
    .await
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
