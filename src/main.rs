//! etcd-live-config command line.
//!
//! # Commands
//! - `keys`: print the key mapping
//! - `dump`: load once and print the snapshot
//! - `watch`: keep the cache live and print every applied change until SIGINT/SIGTERM
//!
//! The `memory` backend is an in-process store seeded from a flat TOML table of
//! `"store key" = value`; the `etcd` backend needs the `etcd` feature.

use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use etcd_live_config::config::{read_settings, validate_settings, ProcessEnv, SettingsError};
use etcd_live_config::lifecycle::signals::wait_for_signal;
use etcd_live_config::observability::{logging, metrics};
use etcd_live_config::schema::control_unit::control_unit_schema;
use etcd_live_config::store::{KvStore, MemoryStore};
use etcd_live_config::{LiveConfig, Settings};

#[derive(Parser)]
#[command(name = "etcd-live-config")]
#[command(about = "Live configuration cache backed by etcd", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store endpoint, overrides settings and environment
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Root key prefix
    #[arg(long, global = true)]
    root_key: Option<String>,

    /// Read configuration from environment variables
    #[arg(long, global = true)]
    local: bool,

    /// Use the /dev key namespace
    #[arg(long, global = true)]
    dev: bool,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[arg(long, global = true, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Seed for the memory backend
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Etcd,
}

#[derive(Subcommand)]
enum Commands {
    /// Print store key, logical name, and environment variable for every entry
    Keys,
    /// Load once and print the configuration as JSON
    Dump,
    /// Keep the configuration live and print each applied change
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let log_handle = logging::init_logging(&cli.log_level)?;
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)?;
    }

    let settings = settings(&cli)?;
    let schema = control_unit_schema(settings.store.root_key.as_deref(), settings.store.dev)?;

    if let Commands::Keys = cli.command {
        let mapping = schema.mapping();
        let entries: Vec<_> = mapping
            .logical_names()
            .into_iter()
            .map(|name| {
                let store_key = mapping
                    .store_entries()
                    .find(|(_, n)| *n == name)
                    .map(|(key, _)| key);
                json!({
                    "name": name,
                    "store_key": store_key,
                    "env_var": mapping.env_var_for(name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({
            "prefix": mapping.prefix(),
            "entries": entries,
        }))?);
        return Ok(());
    }

    let live = LiveConfig::builder()
        .settings(settings)
        .schema(schema)
        .shared_store(store(cli.backend, cli.seed.as_deref())?)
        .env(ProcessEnv)
        .log_reconfigure(Arc::new(log_handle))
        .build()?;

    match cli.command {
        Commands::Keys => {}
        Commands::Dump => {
            let report = live.load_initial().await?;
            eprintln!("{}", serde_json::to_string(&report)?);
            println!("{}", serde_json::to_string_pretty(&live.get_all().await)?);
        }
        Commands::Watch => {
            let report = live.start().await?;
            tracing::info!(
                loaded = report.loaded,
                expected = report.expected,
                state = %live.state(),
                "Watching configuration"
            );

            let mut changes = live.changes();
            let printer = tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(change) => match serde_json::to_string(&change) {
                            Ok(line) => println!("{}", line),
                            Err(e) => tracing::warn!(error = %e, "Failed to encode change"),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Change printer fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            wait_for_signal().await;
            live.stop().await;
            printer.abort();
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}

/// File, then environment, then flags; validated last.
fn settings(cli: &Cli) -> Result<Settings, SettingsError> {
    let mut settings = read_settings(cli.config.as_deref(), &ProcessEnv)?;
    if let Some(endpoint) = &cli.endpoint {
        settings.store.endpoint = Some(endpoint.clone());
    }
    if let Some(root) = &cli.root_key {
        settings.store.root_key = Some(root.clone());
    }
    if cli.local {
        settings.store.use_local_config = true;
    }
    if cli.dev {
        settings.store.dev = true;
    }
    // the memory backend never dials out
    if cli.backend == Backend::Memory && settings.store.endpoint.is_none() {
        settings.store.endpoint = Some("http://memory:2379".into());
    }
    validate_settings(&settings).map_err(SettingsError::Validation)?;
    Ok(settings)
}

fn store(backend: Backend, seed: Option<&Path>) -> Result<Arc<dyn KvStore>, Box<dyn Error>> {
    match backend {
        Backend::Memory => {
            let store = match seed {
                Some(path) => {
                    let table: toml::Table = toml::from_str(&std::fs::read_to_string(path)?)?;
                    MemoryStore::with_entries(table.into_iter().map(|(key, value)| {
                        let raw = match value {
                            toml::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, raw)
                    }))
                }
                None => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
        #[cfg(feature = "etcd")]
        Backend::Etcd => Ok(Arc::new(etcd_live_config::store::EtcdStore)),
        #[cfg(not(feature = "etcd"))]
        Backend::Etcd => Err("the etcd backend requires building with --features etcd".into()),
    }
}
