use anyhow::Context;
use clap::{Parser, Subcommand};
use nutrient_ledger::{
    config::{init_tracing, load_config},
    db::{establish_connection_with_config, DbConfig},
    migrator::Migrator,
};
use sea_orm_migration::MigratorTrait;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "migration", about = "Manage the nutrient ledger schema")]
struct Cli {
    /// Overrides the configured database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations (default)
    Up {
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Drop every table and re-apply all migrations
    Fresh,
    /// Show applied and pending migrations
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config().context("loading configuration")?;
    init_tracing(&cfg.log_level, cfg.log_json);

    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    let mut db_config = DbConfig::from(&cfg);
    db_config.max_connections = 1;
    db_config.min_connections = 1;
    let db = establish_connection_with_config(&db_config)
        .await
        .context("connecting to database")?;

    match cli.command.unwrap_or(Command::Up { steps: None }) {
        Command::Up { steps } => {
            info!(?steps, "Applying migrations");
            Migrator::up(&db, steps).await?;
        }
        Command::Down { steps } => {
            if cfg.is_production() {
                warn!(steps, "Rolling back migrations in production");
            }
            Migrator::down(&db, Some(steps)).await?;
        }
        Command::Fresh => {
            if cfg.is_production() {
                anyhow::bail!("refusing to drop all tables in production");
            }
            Migrator::fresh(&db).await?;
        }
        Command::Status => {
            Migrator::status(&db).await?;
        }
    }

    info!("Migration command completed");
    Ok(())
}
