//! # Launchgate Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use launchgate::{config::ConfigLoader, db, server::run_server};

#[derive(Debug, Parser)]
#[command(name = "launchgate", version, about = "Launchgate API service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and background services (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Migrate => {
            let pool = db::init_pool(&config)
                .await
                .context("initializing database connection pool")?;
            db::run_migrations(&pool).await?;
            println!("Migrations applied for profile: {}", config.profile);
            Ok(())
        }
    }
}
