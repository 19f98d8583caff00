use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registrar_core::cli::{self, Cli, Commands, DbCommands};
use registrar_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match args.command {
        None => cli::handle_serve(&config, false).await,
        Some(Commands::Serve { in_memory }) => cli::handle_serve(&config, in_memory).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config).await,
        Some(Commands::Health) => cli::handle_health(&config).await,
    }
}
