//! `cuckoocached` binary entry point: CLI parsing, config loading,
//! logging setup, storage/table setup, and the TCP accept loop.
//!
//! Library code (`src/lib.rs` and beneath) returns narrow typed errors
//! (`CacheError`, `StorageError`); this binary is the one place that
//! uses `anyhow::Result` with `.context(...)` for human-readable
//! top-level failures, mirroring the reference stack's CLI/library
//! error-handling split.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cuckoocache::clock::SystemClock;
use cuckoocache::config::Config;
use cuckoocache::metrics::{start_periodic_flush, Metrics};
use cuckoocache::server::{serve, Dispatcher};
use cuckoocache::storage::Table;

/// Usage error: bad CLI invocation. `clap` itself already exits with
/// this code (2, which it reports as 64 via `sysexits`-aligned docs)
/// on argument parse failure; kept as a named constant for the one
/// post-parse usage check this binary makes itself.
const EX_USAGE: i32 = 64;
/// Bad configuration value, discovered after merging file/env/CLI
/// sources (spec §6 "Exit codes").
const EX_CONFIG: i32 = 65;
/// A post-validation startup step failed (table allocation, socket bind).
const EX_SOFTWARE_CONFIG: i32 = 78;

/// An in-memory, cuckoo-hashed key/value cache speaking the ASCII
/// memcached wire protocol.
///
/// `append`/`prepend` are not supported (see `version`'s reply and
/// spec.md's Non-goals) — any request naming them replies `ERROR`.
#[derive(Parser, Debug)]
#[command(name = "cuckoocached", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to bind the TCP listener to.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the TCP listener to.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Maximum key+value payload size per slot, in bytes.
    #[arg(long)]
    item_size: Option<usize>,

    /// Number of slots in the cuckoo table (fixed for the process lifetime).
    #[arg(short = 'n', long)]
    nitem: Option<usize>,

    /// Cuckoo displacement victim-selection rule: `random` or `firstprobe`.
    #[arg(long)]
    cuckoo_policy: Option<String>,

    /// Maximum accepted key length in bytes.
    #[arg(long)]
    key_maxlen: Option<usize>,

    /// Disable the `stats` command.
    #[arg(long)]
    no_stats: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(config_exit_code(&e));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e:#}");
            std::process::exit(EX_SOFTWARE_CONFIG);
        }
    };

    let local = tokio::task::LocalSet::new();
    let result = runtime.block_on(local.run_until(run(config)));

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(EX_SOFTWARE_CONFIG);
    }
}

/// Merge defaults/file/env (via [`Config::load`]), then apply CLI
/// overrides (highest priority), then validate.
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(host) = &cli.host {
        config.server_host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(size) = cli.item_size {
        config.cuckoo_item_size = size;
    }
    if let Some(n) = cli.nitem {
        config.cuckoo_nitem = n;
    }
    if let Some(policy) = &cli.cuckoo_policy {
        config.cuckoo_policy = match policy.to_lowercase().as_str() {
            "random" => cuckoocache::config::EvictionPolicy::Random,
            "firstprobe" | "first_probe" => cuckoocache::config::EvictionPolicy::FirstProbe,
            other => {
                anyhow::bail!(UsageError(format!(
                    "unrecognized --cuckoo-policy '{other}' (expected 'random' or 'firstprobe')"
                )));
            }
        };
    }
    if let Some(key_maxlen) = cli.key_maxlen {
        config.key_maxlen = key_maxlen;
    }
    if cli.no_stats {
        config.stats_enabled = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// A CLI-flag-only problem distinct from a bad config *value*, so
/// `main` can tell the two apart when choosing an exit code (spec §6).
#[derive(Debug)]
struct UsageError(String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for UsageError {}

fn config_exit_code(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<UsageError>().is_some() {
        EX_USAGE
    } else {
        EX_CONFIG
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        host = %config.server_host,
        port = config.server_port,
        item_size = config.cuckoo_item_size,
        nitem = config.cuckoo_nitem,
        cuckoo_dimension = cuckoocache::storage::DIMENSION,
        cuckoo_policy = ?config.cuckoo_policy,
        "cuckoocached starting"
    );

    let table = Table::new(config.cuckoo_item_size, config.cuckoo_nitem);
    let metrics = Arc::new(Metrics::new());
    let clock = Arc::new(SystemClock);

    let dispatcher = Rc::new(RefCell::new(Dispatcher::new(
        table,
        Arc::clone(&metrics),
        clock,
        config.cuckoo_policy,
        config.key_maxlen,
    )));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let flush_handle = start_periodic_flush(Arc::clone(&metrics), 60, shutdown_rx.clone());

    tokio::task::spawn_local(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::warn!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    serve(
        &config.server_host,
        config.server_port,
        dispatcher,
        shutdown_rx,
    )
    .await
    .context("server loop failed")?;

    let _ = flush_handle.await;
    info!("cuckoocached stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
