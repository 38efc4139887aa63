//! DriverLedger CLI - inspect and drive the offline-first data layer
//!
//! Usage: ledger <command> [options]

mod fs_remote;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fs_remote::{FsRemote, RemoteDirProbe};
use ledger_common::records::KNOWN_COLLECTIONS;
use ledger_common::telemetry::{init_tracing, LogFormat, VERBOSE_FILTER};
use ledger_common::{
    Collection, DeliveryLogs, Expenses, LedgerError, Settings, EXIT_CONFIG_ERROR, EXIT_ERROR,
    EXIT_SUCCESS, EXIT_SYNC_FAILED, EXIT_USAGE,
};
use ledger_config::{Config, CONFIG_FILE};
use ledger_sync::{
    ConnectivityMonitor, DataStore, LocalStore, SyncConfig, SyncEngine, SyncError,
    TaskGuard,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "ledger",
    version = "0.1.0",
    about = "DriverLedger offline-first data sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(clap::Args)]
struct GlobalArgs {
    /// Device data directory (config.toml and the local store)
    #[arg(long, global = true, env = "LEDGER_DATA_DIR", default_value = ".ledger")]
    data_dir: PathBuf,

    /// Directory acting as the remote document store [default: <data-dir>/remote]
    #[arg(long, global = true, env = "LEDGER_REMOTE_DIR")]
    remote_dir: Option<PathBuf>,

    /// Signed-in user id
    #[arg(long, global = true, env = "LEDGER_USER")]
    user: Option<String>,

    /// Never contact the remote
    #[arg(long, global = true)]
    offline: bool,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config.toml into the data directory
    Init,

    /// Replace a collection with a JSON value
    Put {
        collection: String,

        /// Full collection value as JSON, `null` deletes the document
        json: String,
    },

    /// Print the cached value of a collection (no network)
    Show {
        collection: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List queued mutations
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Push every queued mutation
    Sync,

    /// Push queued mutations for a collection, then re-read it from the remote
    Refresh { collection: String },

    /// Per-collection sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print every change to a collection until Ctrl-C
    Watch { collection: String },

    /// Flush what can be flushed, then clear local data for the user
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let global = &cli.global;

    let config = if matches!(cli.command, Commands::Init) {
        Config::with_defaults(&global.data_dir)
    } else {
        match Config::load(&global.data_dir) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
    };

    let level = if global.verbose {
        VERBOSE_FILTER
    } else {
        config.logging.level.as_str()
    };
    let format = if global.json_logs || config.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_tracing(level, format);
    tracing::info!("DriverLedger CLI started");

    let result = match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Put { collection, json } => cmd_put(global, &config, &collection, &json).await,
        Commands::Show { collection, json } => cmd_show(global, &config, &collection, json).await,
        Commands::Pending { json } => cmd_pending(global, &config, json).await,
        Commands::Sync => cmd_sync(global, &config).await,
        Commands::Refresh { collection } => cmd_refresh(global, &config, &collection).await,
        Commands::Status { json } => cmd_status(global, &config, json).await,
        Commands::Watch { collection } => cmd_watch(global, &config, &collection).await,
        Commands::Logout => cmd_logout(global, &config).await,
    };

    match result {
        Ok(EXIT_SUCCESS) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

//
// Helper functions
//

fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<LedgerError>() {
        return match e {
            LedgerError::NotLoggedIn | LedgerError::ValidationError(_) => EXIT_USAGE,
            LedgerError::ConfigError(_) => EXIT_CONFIG_ERROR,
            _ => EXIT_ERROR,
        };
    }
    match error.downcast_ref::<SyncError>() {
        Some(SyncError::ConfigError(_)) => EXIT_CONFIG_ERROR,
        _ => EXIT_ERROR,
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Typed collections must decode into their record type
fn validate_payload(collection: &str, value: &Value) -> Result<(), LedgerError> {
    fn decodes<C: Collection>(value: &Value) -> serde_json::Result<()> {
        serde_json::from_value::<C::Value>(value.clone()).map(|_| ())
    }

    if value.is_null() {
        return Ok(());
    }

    let decoded = if collection == DeliveryLogs::NAME {
        decodes::<DeliveryLogs>(value)
    } else if collection == Settings::NAME {
        decodes::<Settings>(value)
    } else if collection == Expenses::NAME {
        decodes::<Expenses>(value)
    } else {
        Ok(())
    };
    decoded.map_err(|e| LedgerError::ValidationError(format!("{}: {}", collection, e)))
}

/// How much of the world a command may touch
#[derive(Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Local store only, no background sync
    Local,
    /// Local store and remote, engine running
    Networked,
}

struct Session {
    data: DataStore,
    remote_dir: PathBuf,
    _probe: Option<TaskGuard>,
}

impl Session {
    fn engine(&self) -> &SyncEngine {
        self.data.engine()
    }

    /// Drain every collection; returns (applied, dropped) for this session.
    ///
    /// Counts come from the engine totals so drains started before the flush
    /// are included.
    async fn flush(&self) -> anyhow::Result<(usize, usize)> {
        self.data.engine().flush_all().await?;
        Ok(self.data.engine().drain_totals())
    }
}

fn remote_dir(global: &GlobalArgs, config: &Config) -> PathBuf {
    global
        .remote_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.join("remote"))
}

fn open_engine(
    global: &GlobalArgs,
    config: &Config,
    reach: Reach,
) -> anyhow::Result<(SyncEngine, PathBuf, ConnectivityMonitor)> {
    let user = global.user.clone().ok_or(LedgerError::NotLoggedIn)?;
    let store = LocalStore::open(&config.db_path())
        .with_context(|| format!("Failed to open local store in {}", config.data_dir.display()))?;

    let remote_dir = remote_dir(global, config);
    let remote = Arc::new(FsRemote::new(&remote_dir));
    let online = reach == Reach::Networked && !global.offline && remote_dir.is_dir();
    let connectivity = ConnectivityMonitor::new(online);

    let engine = SyncEngine::new(
        SyncConfig::from_settings(&config.sync),
        user,
        &store,
        remote,
        connectivity.clone(),
    )?;
    Ok((engine, remote_dir, connectivity))
}

fn open_session(global: &GlobalArgs, config: &Config, reach: Reach) -> anyhow::Result<Session> {
    let (engine, remote_dir, connectivity) = open_engine(global, config, reach)?;

    let probe = if reach == Reach::Networked && !global.offline {
        let every = Duration::from_millis(config.connectivity.probe_interval_ms);
        Some(connectivity.spawn_probe(RemoteDirProbe::new(&remote_dir), every))
    } else {
        None
    };

    Ok(Session {
        data: DataStore::from_engine(engine),
        remote_dir,
        _probe: probe,
    })
}

//
// Command implementations
//

async fn cmd_init(config: &Config) -> anyhow::Result<i32> {
    let data_dir = &config.data_dir;
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
        eprintln!("✓ Created {}", data_dir.display());
    }

    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        eprintln!("✓ {} already exists", config_path.display());
    } else {
        std::fs::write(&config_path, config.to_toml()?)?;
        eprintln!("✓ Created {}", config_path.display());
    }

    eprintln!("\n✅ Data directory initialized");
    Ok(EXIT_SUCCESS)
}

async fn cmd_put(
    global: &GlobalArgs,
    config: &Config,
    collection: &str,
    raw: &str,
) -> anyhow::Result<i32> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LedgerError::ValidationError(format!("invalid JSON: {}", e)))?;
    validate_payload(collection, &value)?;

    let session = open_session(global, config, Reach::Networked)?;
    let handle = session.data.collection_by_name(collection);
    if value.is_null() {
        handle.delete()?;
    } else {
        handle.update_data(value)?;
    }

    if !session.engine().connectivity().is_online() {
        eprintln!("✓ Saved {} (offline, queued)", collection);
        return Ok(EXIT_SUCCESS);
    }

    let (_, failed) = session.flush().await?;
    let pending = session.engine().pending_count(collection)?;
    if failed > 0 {
        eprintln!("⚠ Saved {} locally, but the remote rejected {} change(s)", collection, failed);
        return Ok(EXIT_SYNC_FAILED);
    }
    if pending > 0 {
        eprintln!("✓ Saved {} ({} change(s) still queued)", collection, pending);
    } else {
        eprintln!("✓ Saved and synced {}", collection);
    }
    Ok(EXIT_SUCCESS)
}

async fn cmd_show(
    global: &GlobalArgs,
    config: &Config,
    collection: &str,
    as_json: bool,
) -> anyhow::Result<i32> {
    let (engine, _, _) = open_engine(global, config, Reach::Local)?;
    let cached = engine.cached(collection)?;
    let pending = engine.pending_count(collection)?;

    if as_json {
        print_json(&json!({
            "collection": collection,
            "data": cached.as_ref().map(|entry| &entry.value),
            "cachedAt": cached.as_ref().map(|entry| entry.fetched_at),
            "pending": pending,
        }))?;
        return Ok(EXIT_SUCCESS);
    }

    match cached {
        Some(entry) => {
            println!("{}", serde_json::to_string_pretty(&entry.value)?);
            eprintln!(
                "cached {} · {} pending",
                entry.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
                pending
            );
        }
        None => eprintln!("No cached value for {}", collection),
    }
    Ok(EXIT_SUCCESS)
}

async fn cmd_pending(global: &GlobalArgs, config: &Config, as_json: bool) -> anyhow::Result<i32> {
    let (engine, _, _) = open_engine(global, config, Reach::Local)?;
    let entries = engine.pending_entries()?;

    if as_json {
        print_json(&entries)?;
        return Ok(EXIT_SUCCESS);
    }

    if entries.is_empty() {
        eprintln!("Nothing queued");
        return Ok(EXIT_SUCCESS);
    }

    for entry in &entries {
        let created = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());
        println!(
            "{}  {:<6}  {:<14}  retries={}  {}",
            entry.id, entry.operation, entry.collection, entry.retry_count, created
        );
    }
    eprintln!("{} pending", entries.len());
    Ok(EXIT_SUCCESS)
}

async fn cmd_sync(global: &GlobalArgs, config: &Config) -> anyhow::Result<i32> {
    let session = open_session(global, config, Reach::Networked)?;
    let queued = session.engine().pending_entries()?.len();

    if !session.engine().connectivity().is_online() {
        if queued == 0 {
            eprintln!("✓ Nothing to sync");
            return Ok(EXIT_SUCCESS);
        }
        eprintln!(
            "⚠ Remote {} unreachable, {} change(s) stay queued",
            session.remote_dir.display(),
            queued
        );
        return Ok(EXIT_SYNC_FAILED);
    }

    let (applied, failed) = session.flush().await?;
    let remaining = session.engine().pending_entries()?.len();

    eprintln!("✓ Pushed {} change(s)", applied);
    if failed > 0 {
        eprintln!("✗ Dropped {} change(s) after repeated failures", failed);
        return Ok(EXIT_SYNC_FAILED);
    }
    if remaining > 0 {
        eprintln!("⚠ {} change(s) still queued", remaining);
        return Ok(EXIT_SYNC_FAILED);
    }
    Ok(EXIT_SUCCESS)
}

async fn cmd_refresh(global: &GlobalArgs, config: &Config, collection: &str) -> anyhow::Result<i32> {
    let session = open_session(global, config, Reach::Networked)?;
    let handle = session.data.collection_by_name(collection);

    if !handle.force_refresh().await {
        let view = handle.snapshot();
        eprintln!(
            "✗ Refresh of {} failed ({}){}",
            collection,
            view.sync_status,
            view.error.map(|e| format!(": {}", e)).unwrap_or_default()
        );
        return Ok(EXIT_SYNC_FAILED);
    }

    match handle.data() {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => eprintln!("{} does not exist on the remote", collection),
    }
    Ok(EXIT_SUCCESS)
}

async fn cmd_status(global: &GlobalArgs, config: &Config, as_json: bool) -> anyhow::Result<i32> {
    let (engine, _, _) = open_engine(global, config, Reach::Networked)?;

    let mut collections: Vec<String> = KNOWN_COLLECTIONS.iter().map(|c| c.to_string()).collect();
    let discovered = engine
        .cached_collections()?
        .into_iter()
        .chain(engine.pending_entries()?.into_iter().map(|e| e.collection));
    for collection in discovered {
        if !collections.contains(&collection) {
            collections.push(collection);
        }
    }

    let mut rows = Vec::with_capacity(collections.len());
    for collection in &collections {
        let status = engine.inspect(collection);
        let pending = engine.pending_count(collection)?;
        let cached_at = engine.cached(collection)?.map(|entry| entry.fetched_at);
        rows.push((collection.clone(), status, pending, cached_at));
    }

    if as_json {
        let body: Vec<Value> = rows
            .iter()
            .map(|(collection, status, pending, cached_at)| {
                json!({
                    "collection": collection,
                    "status": status,
                    "pending": pending,
                    "cachedAt": cached_at,
                })
            })
            .collect();
        print_json(&json!({
            "user": engine.user_id(),
            "online": engine.connectivity().is_online(),
            "collections": body,
        }))?;
        return Ok(EXIT_SUCCESS);
    }

    let online = if engine.connectivity().is_online() { "online" } else { "offline" };
    println!("user {} ({})", engine.user_id(), online);
    for (collection, status, pending, _) in rows {
        println!("  {:<14} {:<12} {} pending", collection, status.to_string(), pending);
    }
    Ok(EXIT_SUCCESS)
}

async fn cmd_watch(global: &GlobalArgs, config: &Config, collection: &str) -> anyhow::Result<i32> {
    let session = open_session(global, config, Reach::Networked)?;
    let mut handle = session.data.collection_by_name(collection);

    eprintln!("Watching {} (Ctrl-C to stop)", collection);
    let mut last = None;
    loop {
        let view = handle.snapshot();
        let line = serde_json::to_string(&view)?;
        if last.as_ref() != Some(&line) {
            println!("{}", line);
            last = Some(line);
        }

        tokio::select! {
            alive = handle.changed() => if !alive { break },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.data.shutdown();
    Ok(EXIT_SUCCESS)
}

async fn cmd_logout(global: &GlobalArgs, config: &Config) -> anyhow::Result<i32> {
    let session = open_session(global, config, Reach::Networked)?;
    session.data.logout().await?;
    eprintln!("✓ Logged out, local data cleared");
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_typed_payloads() {
        assert!(validate_payload("settings", &json!({"currency": "EUR"})).is_ok());
        assert!(validate_payload("settings", &json!([1, 2])).is_err());
        assert!(validate_payload("deliveryLogs", &json!([])).is_ok());
        assert!(validate_payload("deliveryLogs", &json!({"id": "x"})).is_err());
        assert!(validate_payload("anything", &json!(42)).is_ok());
        assert!(validate_payload("expenses", &Value::Null).is_ok());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&LedgerError::NotLoggedIn.into()), EXIT_USAGE);
        assert_eq!(
            exit_code_for(&LedgerError::ConfigError("bad".into()).into()),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_ERROR);
    }
}
