//! outbox-relay CLI: run the relay and inspect the outbox.

use clap::{Parser, Subcommand};
use outbox_relay::config::secrets::ExposeSecret;
use outbox_relay::config::{Config, RelayConfig};
use outbox_relay::db::Db;
use outbox_relay::relay::Relay;
use outbox_relay::telemetry::{TelemetryConfig, init_telemetry};
use outbox_relay::transport::MemoryTransport;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "outbox-relay", about = "Relay outbox records to a downstream consumer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay until Ctrl-C
    Serve {
        /// TOML file with relay settings; replaces the RELAY_* variables
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Append a record to the outbox
    Enqueue {
        /// Record payload
        payload: String,
    },
    /// Show records awaiting settlement
    Pending {
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => cmd_serve(config).await,
        Command::Enqueue { payload } => {
            let db = open_db().await?;
            let id = db.enqueue(payload.as_bytes()).await?;
            println!("Enqueued: {id}");
            Ok(())
        }
        Command::Pending { limit, json } => {
            let db = open_db().await?;
            cmd_pending(&db, limit, json).await
        }
    }
}

async fn open_db() -> anyhow::Result<Db> {
    let config = Config::from_env()?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve(config_file: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = config_file {
        config.relay = RelayConfig::from_file(&path)?;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "outbox-relay".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.health_check().await?;

    let window = u32::try_from(config.relay.buffer_capacity).unwrap_or(u32::MAX);
    let relay = Relay::new(
        Arc::new(db),
        MemoryTransport::loopback(window),
        config.relay,
    );

    let handle = relay.handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    let stats = relay.run().await?;
    println!(
        "Relayed {} record(s), {} settled, {} released over {} connection(s)",
        stats.sent, stats.settled, stats.discarded, stats.connections
    );
    Ok(())
}

#[derive(serde::Serialize)]
struct PendingRow {
    id: i64,
    payload: String,
    enqueued_at: chrono::DateTime<chrono::Utc>,
}

async fn cmd_pending(db: &Db, limit: i64, json: bool) -> anyhow::Result<()> {
    let total = db.pending_count().await?;
    let records = db.list_pending(limit).await?;

    if json {
        let rows: Vec<PendingRow> = records
            .iter()
            .map(|r| PendingRow {
                id: r.id.0,
                payload: String::from_utf8_lossy(&r.payload).into_owned(),
                enqueued_at: r.enqueued_at,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No pending records.");
        return Ok(());
    }

    println!("{:<10}  {:<16}  PAYLOAD", "ID", "ENQUEUED");
    println!("{}", "-".repeat(80));
    for record in &records {
        let payload = String::from_utf8_lossy(&record.payload);
        let shown: String = payload.chars().take(50).collect();
        println!(
            "{:<10}  {:<16}  {}",
            record.id,
            record.enqueued_at.format("%Y-%m-%d %H:%M"),
            shown
        );
    }

    println!("\n{} of {total} pending record(s)", records.len());
    Ok(())
}
