//! Aion CLI Entry Point
//!
//! Thin JSON-only front end over the library:
//! - `databases`, `tables`, `columns` - Catalog discovery
//! - `query` - Execute SQL (Ctrl-C cancels)
//! - `plan` - Fetch an estimated or actual plan
//! - `validate` - Check a connection string
//! - `monitor` - Run the health monitor over saved connections
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use aion::config::{self, EntityStore, JsonFileStore};
use aion::events::{spawn_activity_tracker, Event};
use aion::{
    AionError, Connection, ConnectionManager, ConnectionSet, DatabaseType, ErrorEnvelope, EventBus, HealthMonitor,
    Metadata, ProviderRegistry, SuccessEnvelope,
};

/// Aion - Multi-dialect database access engine
#[derive(Parser)]
#[command(name = "aion")]
#[command(about = "Multi-dialect database access engine with JSON output")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    /// Database type (postgres, mysql, sqlserver, document)
    #[arg(long)]
    engine: DatabaseType,

    /// Flat key=value connection string
    #[arg(long = "connection-string")]
    connection_string: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases on the server
    Databases {
        #[command(flatten)]
        target: Target,
    },

    /// List tables of a database
    Tables {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        database: String,
    },

    /// List columns of a table
    Columns {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        database: String,
        #[arg(long)]
        table: String,
    },

    /// Execute SQL
    Query {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        sql: String,
    },

    /// Fetch a query plan
    Plan {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        sql: String,
        /// Actual plan (executes the statement server-side)
        #[arg(long)]
        actual: bool,
    },

    /// Validate a connection string without connecting
    Validate {
        #[command(flatten)]
        target: Target,
    },

    /// Monitor saved connections, printing health events as JSON lines
    Monitor,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Databases { .. } => "databases",
            Self::Tables { .. } => "tables",
            Self::Columns { .. } => "columns",
            Self::Query { .. } => "query",
            Self::Plan { .. } => "plan",
            Self::Validate { .. } => "validate",
            Self::Monitor => "monitor",
        }
    }

    fn engine(&self) -> String {
        match self {
            Self::Databases { target }
            | Self::Tables { target, .. }
            | Self::Columns { target, .. }
            | Self::Query { target, .. }
            | Self::Plan { target, .. }
            | Self::Validate { target } => target.engine.to_string(),
            Self::Monitor => String::new(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(r#"{{"ok": false, "error": {{"code": "SERIALIZATION", "message": "{e}"}}}}"#),
    }
}

fn success<T: Serialize>(command: &Commands, data: T, meta: Metadata) {
    print_json(&SuccessEnvelope::new(command.engine(), command.name(), data, meta));
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn rewrite(providers: &ProviderRegistry, target: &Target, database: Option<&str>) -> aion::Result<String> {
    let provider = providers.get(target.engine)?;
    Ok(match database {
        Some(db) => provider.rewrite_connection_string(&target.connection_string, db),
        None => target.connection_string.clone(),
    })
}

async fn run(command: &Commands) -> aion::Result<()> {
    let providers = Arc::new(ProviderRegistry::with_default_providers());
    let started = Instant::now();

    match command {
        Commands::Databases { target } => {
            let provider = providers.get(target.engine)?;
            let databases = provider
                .list_databases(&target.connection_string)
                .await?
                .ok_or_else(|| AionError::connection_failed("Could not open connection"))?;
            let rows = databases.len();
            success(command, databases, Metadata::with_rows(elapsed_ms(started), rows));
        }
        Commands::Tables { target, database } => {
            let provider = providers.get(target.engine)?;
            let cs = rewrite(&providers, target, Some(database))?;
            let tables = provider.list_tables(&cs, database).await?;
            let rows = tables.len();
            success(command, tables, Metadata::with_rows(elapsed_ms(started), rows));
        }
        Commands::Columns { target, database, table } => {
            let provider = providers.get(target.engine)?;
            let cs = rewrite(&providers, target, Some(database))?;
            let columns = provider.list_columns(&cs, database, table).await?;
            let rows = columns.len();
            success(command, columns, Metadata::with_rows(elapsed_ms(started), rows));
        }
        Commands::Query { target, database, sql } => {
            let provider = providers.get(target.engine)?;
            let cs = rewrite(&providers, target, database.as_deref())?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let result = provider.execute_query(&cs, sql, &cancel).await;
            match ErrorEnvelope::from_result(command.engine(), command.name(), &result) {
                Some(envelope) => print_json(&envelope),
                None => {
                    let meta = Metadata::for_result(&result);
                    success(command, result, meta);
                }
            }
        }
        Commands::Plan { target, database, sql, actual } => {
            let provider = providers.get(target.engine)?;
            let cs = rewrite(&providers, target, database.as_deref())?;
            let plan = if *actual {
                provider.actual_plan(&cs, sql).await
            } else {
                provider.estimated_plan(&cs, sql).await
            };
            success(command, plan, Metadata::new(elapsed_ms(started)));
        }
        Commands::Validate { target } => {
            providers.get(target.engine)?.validate_connection_string(&target.connection_string)?;
            success(command, serde_json::json!({ "valid": true }), Metadata::new(elapsed_ms(started)));
        }
        Commands::Monitor => monitor(providers).await?,
    }
    Ok(())
}

async fn monitor(providers: Arc<ProviderRegistry>) -> aion::Result<()> {
    let settings = config::load()?;
    let connections = Arc::new(ConnectionSet::new());
    let events = EventBus::default();
    let store: Arc<dyn EntityStore<Connection>> = Arc::new(JsonFileStore::new(settings.connections_path()?));

    let manager = ConnectionManager::new(Arc::clone(&connections), Arc::clone(&providers), events.clone(), store);
    manager.initialize()?;
    for connection in connections.list() {
        manager.connect(connection.id).await?;
    }

    let monitor = Arc::new(HealthMonitor::new(connections, providers, events.clone(), settings.health));
    let tracker = spawn_activity_tracker(&events, Arc::clone(&monitor));

    let mut receiver = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            if matches!(event, Event::ConnectionHealthChanged { .. } | Event::ConnectionStateChanged { .. }) {
                print_json(&event);
            }
        }
    });

    if !monitor.start() {
        return Err(AionError::config_error("Health monitor is disabled in settings"));
    }

    // Probe everything once up front instead of waiting a full interval
    monitor.check_connections_once().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AionError::config_error(format!("Could not listen for Ctrl-C: {e}")))?;

    monitor.stop().await;
    tracker.abort();
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aion=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli.command).await {
        print_json(&ErrorEnvelope::from_error(cli.command.engine(), cli.command.name(), &e));
        std::process::exit(1);
    }
    Ok(())
}
