use std::path::PathBuf;

use anyhow::Context;
use bolao_server::config::ServerConfig;
use bolao_server::connection_manager::{handle_listen_server, Services};
use bolao_server::database::DatabaseConnection;
use bolao_server::database_manager::{self, DatabaseManager, DatabaseRequest};
use bolao_server::draw_manager::DrawManager;
use clap::Parser;
use common::Role;
use tokio::join;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bolao-server")]
#[command(about = "Lottery pool bet and draw settlement server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept client connections on
    #[arg(long)]
    listen: Option<String>,

    /// Record store address, e.g. ws://127.0.0.1:8000 or mem://
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bolao_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    if let Some(database) = args.database {
        config.database.address = database;
    }
    config.validate()?;

    let database = DatabaseConnection::connect(&config.database)
        .await
        .with_context(|| format!("connecting to record store at {}", config.database.address))?;
    info!(address = %config.database.address, "connected to record store");

    let (db_tx, db_rx) = mpsc::channel(config.queue_capacity);
    let mut db_manager = DatabaseManager::new(database, db_rx);

    let db_task = tokio::spawn(async move {
        db_manager.manage().await;
    });

    if let Some(admin) = config.bootstrap_admin.clone() {
        database_manager::request(&db_tx, |responder| DatabaseRequest::EnsureProfile {
            name: admin,
            role: Role::Admin,
            responder,
        })
        .await?;
    }

    let (draw_tx, draw_rx) = mpsc::channel(config.queue_capacity);
    let mut draw_manager = DrawManager::new(draw_rx, db_tx.clone(), config.pool.prize_tiers.clone());

    let draw_task = tokio::spawn(async move {
        draw_manager.manage().await;
    });

    let services = Services { db_tx, draw_tx };
    let listen_address = config.listen_address.clone();
    let listen_server_task = tokio::spawn(async move { handle_listen_server(listen_address, services).await });

    let (res1, res2, res3) = join!(db_task, draw_task, listen_server_task);
    res1?;
    res2?;
    res3??;
    Ok(())
}
