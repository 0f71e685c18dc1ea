// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Node Binary
//!
//! Entry point for the `nova-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens storage, and serves the HTTP API.
//!
//! This binary is intentionally thin: block production, P2P transport, and
//! JSON-RPC breadth are out of scope for the core library it wraps. What it
//! does own is bootstrapping — opening the block store and state trie,
//! loading or generating the validator keypair, wiring up the pruning
//! manager, and exposing `/health`, `/status`, and `/metrics` so the node
//! can be operated.
//!
//! Four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — initialize a data directory and generate a validator key
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use nova_protocol::config::{self, NodeConfig, PruningMode};
use nova_protocol::consensus::pos::ProofOfStake;
use nova_protocol::consensus::pow::ProofOfWork;
use nova_protocol::crypto::keys::NovaKeypair;
use nova_protocol::pruning::PruningManager;
use nova_protocol::storage::{Block, NovaDB, StateDb, StateTrie};
use nova_protocol::vm::harness::{ExecutionHarness, StubRuntime};

use cli::{Commands, InitArgs, NovaNodeCli, RunArgs, StatusArgs};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming. Large enough to
/// absorb a short burst without dropping events for connected WS clients.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How often the automatic pruning sweep runs, in seconds.
const AUTO_PRUNE_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NovaNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — node bootstrap
// ---------------------------------------------------------------------------

async fn run_node(args: RunArgs) -> Result<()> {
    let data_dir = resolve_data_dir(&args.data_dir);

    logging::init_logging(
        "nova_node=info,nova_protocol=info,tower_http=debug",
        LogFormat::Pretty,
    );

    let node_config = load_node_config(&args, &data_dir)?;
    node_config
        .sync
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid sync config: {}", e))?;

    tracing::info!(
        data_dir = %data_dir.display(),
        rpc_port = args.rpc_port,
        p2p_port = args.p2p_port,
        metrics_port = args.metrics_port,
        "starting nova-node"
    );

    let keypair = match &args.validator_key {
        Some(hex_key) => {
            NovaKeypair::from_hex(hex_key).context("invalid --validator-key value")?
        }
        None => load_or_generate_keypair(&data_dir)?,
    };
    tracing::info!(
        public_key = %keypair.public_key().to_hex(),
        "validator keypair ready"
    );

    // --- Storage ---
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = Arc::new(
        NovaDB::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    let state_db = Arc::new(StateDb::new(&db).context("failed to open account store")?);
    let trie = Arc::new(StateTrie::new());

    if db.current_height()?.is_none() {
        db.store(&Block::genesis())
            .context("failed to persist genesis block")?;
        tracing::info!("genesis block persisted");
    }

    let block_height = Arc::new(AtomicU64::new(db.current_height()?.unwrap_or(0)));

    // --- Consensus engines ---
    // This binary doesn't run a producer loop; it only needs these so an
    // operator-facing status endpoint can report real difficulty/epoch
    // numbers instead of placeholders.
    let pow = ProofOfWork::from_config(node_config.pow);
    let pos = ProofOfStake::from_config(node_config.pos);
    tracing::info!(
        difficulty = pow.current_difficulty(),
        epoch = pos.current_epoch(),
        "consensus engines initialized"
    );

    // Held so the execution harness is wired the same way a future producer
    // loop would consume it; this binary never calls `execute_block` itself.
    let _harness = ExecutionHarness::new(Arc::clone(&trie), StubRuntime);

    let pruning = Arc::new(
        PruningManager::new(
            Arc::clone(&db),
            Arc::clone(&trie),
            Arc::clone(&state_db),
            node_config.pruning.clone(),
        )
        .context("failed to initialize pruning manager")?,
    );
    if pruning.config().mode != PruningMode::FullArchive {
        pruning.start_automatic_pruning(AUTO_PRUNE_INTERVAL_SECS);
        tracing::info!(interval_secs = AUTO_PRUNE_INTERVAL_SECS, "automatic pruning started");
    }

    let node_metrics = Arc::new(NodeMetrics::new());
    node_metrics
        .block_height
        .set(block_height.load(Ordering::Relaxed) as i64);

    let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            config::PROTOCOL_VERSION,
        ),
        network: config::network_name(config::NETWORK_ID_DEVNET),
        block_height: Arc::clone(&block_height),
        peer_count: Arc::new(AtomicU64::new(0)),
        event_tx,
        metrics: Arc::clone(&node_metrics),
        db: Arc::clone(&db),
        trie: Arc::clone(&trie),
    };

    let rpc_addr: SocketAddr = ([0, 0, 0, 0], args.rpc_port).into();
    let metrics_addr: SocketAddr = ([0, 0, 0, 0], args.metrics_port).into();

    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", rpc_addr))?;
    tracing::info!("RPC/API server listening on {}", rpc_addr);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    print_startup_banner(
        &keypair.public_key().to_hex(),
        rpc_addr,
        args.p2p_port,
        &data_dir.to_string_lossy(),
    );

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    pruning.stop_automatic_pruning();
    tracing::info!("nova-node stopped");
    Ok(())
}

/// Expands a leading `~` to `$HOME`. Doesn't touch any other part of the path.
fn resolve_data_dir(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Loads `NodeConfig` from `--config` if given (JSON — this binary carries
/// no TOML dependency), falling back to defaults. `data_dir` always wins
/// over whatever the config file says, since the CLI flag is the more
/// specific source.
fn load_node_config(args: &RunArgs, data_dir: &Path) -> Result<NodeConfig> {
    let mut node_config = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => NodeConfig::default(),
    };
    node_config.data_dir = data_dir.to_path_buf();
    Ok(node_config)
}

// ---------------------------------------------------------------------------
// init — data directory initialization
// ---------------------------------------------------------------------------

/// Initializes a new node data directory and generates a validator keypair.
///
/// Creates the directory structure:
/// ```text
/// {data_dir}/
///     db/    — sled-backed block and state storage
///     keys/  — validator keypair
/// ```
fn init_node(args: InitArgs) -> Result<()> {
    logging::init_logging("nova_node=info", LogFormat::Pretty);

    let data_dir = resolve_data_dir(&args.data_dir);
    tracing::info!(data_dir = %data_dir.display(), network = %args.network, "initializing node");

    let keys_dir = data_dir.join("keys");
    let key_path = keys_dir.join("validator.key");
    if key_path.exists() {
        anyhow::bail!(
            "data directory already initialized at {} (found {})",
            data_dir.display(),
            key_path.display()
        );
    }

    let db_dir = data_dir.join("db");
    std::fs::create_dir_all(&db_dir)
        .with_context(|| format!("failed to create db directory: {}", db_dir.display()))?;
    std::fs::create_dir_all(&keys_dir)
        .with_context(|| format!("failed to create keys directory: {}", keys_dir.display()))?;

    let keypair = NovaKeypair::generate();
    let pubkey_hex = keypair.public_key().to_hex();
    write_key_file(&key_path, &keypair)?;

    let db = NovaDB::open(&db_dir)
        .with_context(|| format!("failed to open database at {}", db_dir.display()))?;
    db.store(&Block::genesis())
        .context("failed to persist genesis block")?;

    tracing::info!(
        public_key = %pubkey_hex,
        key_path = %key_path.display(),
        "validator keypair generated"
    );

    println!();
    println!("Node initialized successfully.");
    println!();
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {}", args.network);
    println!("  Validator key  : {}", key_path.display());
    println!("  Public key     : {}", pubkey_hex);
    println!("  DB directory   : {}", db_dir.display());
    println!("  Genesis block  : persisted at height 0");
    println!();
    println!("Run `nova-node run -d {}` to start the node.", data_dir.display());

    Ok(())
}

// ---------------------------------------------------------------------------
// status — query a running node
// ---------------------------------------------------------------------------

async fn query_status(args: StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = minimal_http_get(&url).await?;

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => {
            println!("Node Status");
            if let Some(v) = json.get("version").and_then(|v| v.as_str()) {
                println!("  Version     : {}", v);
            }
            if let Some(v) = json.get("network").and_then(|v| v.as_str()) {
                println!("  Network     : {}", v);
            }
            if let Some(v) = json.get("block_height").and_then(|v| v.as_u64()) {
                println!("  Block Height: {}", v);
            }
            if let Some(v) = json.get("peer_count").and_then(|v| v.as_u64()) {
                println!("  Peers       : {}", v);
            }
            if let Some(v) = json.get("synced").and_then(|v| v.as_bool()) {
                println!("  Synced      : {}", if v { "yes" } else { "no" });
            }
            if let Some(v) = json.get("timestamp").and_then(|v| v.as_str()) {
                println!("  Timestamp   : {}", v);
            }
        }
        Err(_) => println!("{}", body),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

fn print_version() {
    println!("nova-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", config::PROTOCOL_VERSION);
    println!("rustc     {}", rustc_version());
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit    {}", commit);
    }
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

// ---------------------------------------------------------------------------
// Keypair persistence
// ---------------------------------------------------------------------------

/// Loads a validator keypair from `{data_dir}/keys/validator.key`, or
/// generates and saves a new one if the key file doesn't exist.
///
/// The key file is hex-encoded (64 hex characters = 32 bytes secret key).
/// File permissions are restricted to owner-only (0o600) on Unix.
fn load_or_generate_keypair(data_dir: &Path) -> Result<NovaKeypair> {
    let keys_dir = data_dir.join("keys");
    let key_path = keys_dir.join("validator.key");

    if key_path.exists() {
        let hex_str = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read validator key from {}", key_path.display()))?;
        let keypair = NovaKeypair::from_hex(hex_str.trim())
            .map_err(|e| anyhow::anyhow!("invalid validator key: {}", e))?;
        tracing::info!(
            public_key = %keypair.public_key().to_hex(),
            key_path = %key_path.display(),
            "loaded validator keypair from disk"
        );
        Ok(keypair)
    } else {
        std::fs::create_dir_all(&keys_dir)
            .with_context(|| format!("failed to create keys directory: {}", keys_dir.display()))?;
        let keypair = NovaKeypair::generate();
        write_key_file(&key_path, &keypair)?;
        tracing::info!(
            public_key = %keypair.public_key().to_hex(),
            key_path = %key_path.display(),
            "generated and saved new validator keypair"
        );
        Ok(keypair)
    }
}

fn write_key_file(key_path: &Path, keypair: &NovaKeypair) -> Result<()> {
    let secret_hex = hex::encode(keypair.secret_key_bytes());
    std::fs::write(key_path, &secret_hex)
        .with_context(|| format!("failed to write validator key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

fn print_startup_banner(public_key: &str, rpc_addr: SocketAddr, p2p_port: u16, data_dir: &str) {
    let key_short = if public_key.len() > 20 {
        format!("{}...", &public_key[..20])
    } else {
        public_key.to_string()
    };

    let lines = [
        format!("  Validator:  {}", key_short),
        format!("  RPC:        http://{}", rpc_addr),
        format!("  P2P port:   {}", p2p_port),
        format!("  Data:       {}", data_dir),
    ];

    let title = format!(
        "  NOVA Protocol \u{2014} Node v{}",
        env!("CARGO_PKG_VERSION")
    );

    let max_width = lines
        .iter()
        .map(|l| l.len())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(50)
        + 4;

    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{}\u{2557}", border);
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{}\u{2563}", border);
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{}\u{255D}", border);
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Minimal HTTP client
// ---------------------------------------------------------------------------

/// Minimal HTTP GET, just enough for `status` to talk to a local node
/// without pulling in a full HTTP client crate for one request.
async fn minimal_http_get(url: &str) -> Result<String> {
    let parsed = MinimalUrl::parse(url).map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;
    let addr = format!("{}:{}", parsed.host, parsed.port);

    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        parsed.path, parsed.host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Just enough of a URL parser to pull host/port/path out of `http://...`.
struct MinimalUrl {
    host: String,
    port: u16,
    path: String,
}

impl MinimalUrl {
    fn parse(s: &str) -> Result<Self, String> {
        let rest = s
            .strip_prefix("http://")
            .or_else(|| s.strip_prefix("https://"))
            .unwrap_or(s);

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rfind(':') {
            Some(i) => {
                let p = authority[i + 1..]
                    .parse::<u16>()
                    .map_err(|e| format!("bad port: {}", e))?;
                (authority[..i].to_string(), p)
            }
            None => (authority.to_string(), 80),
        };

        Ok(MinimalUrl {
            host,
            port,
            path: path.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();

        let keypair = NovaKeypair::generate();
        let key_path = keys_dir.join("validator.key");
        write_key_file(&key_path, &keypair).unwrap();

        let loaded_hex = std::fs::read_to_string(&key_path).unwrap();
        let loaded = NovaKeypair::from_hex(loaded_hex.trim()).unwrap();
        assert_eq!(keypair.public_key().to_hex(), loaded.public_key().to_hex());
    }

    #[test]
    fn load_or_generate_creates_new_key_then_reuses_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("nova-keygen-test");
        std::fs::create_dir_all(&data_dir).unwrap();

        let keypair = load_or_generate_keypair(&data_dir).unwrap();
        let key_path = data_dir.join("keys").join("validator.key");
        assert!(key_path.exists());

        let loaded = load_or_generate_keypair(&data_dir).unwrap();
        assert_eq!(keypair.public_key().to_hex(), loaded.public_key().to_hex());
    }

    #[test]
    fn resolve_data_dir_expands_home() {
        std::env::set_var("HOME", "/home/tester");
        let resolved = resolve_data_dir(Path::new("~/.nova"));
        assert_eq!(resolved, PathBuf::from("/home/tester/.nova"));
    }

    #[test]
    fn resolve_data_dir_leaves_absolute_paths_alone() {
        let resolved = resolve_data_dir(Path::new("/var/lib/nova"));
        assert_eq!(resolved, PathBuf::from("/var/lib/nova"));
    }

    #[test]
    fn startup_banner_does_not_panic() {
        print_startup_banner(
            "9abf3c7de1224a88b6e0dd1f9c5a7e0123456789abcdef0123456789abcdef01",
            SocketAddr::from(([0, 0, 0, 0], 9741)),
            9740,
            "/home/user/.nova",
        );
    }

    #[test]
    fn status_json_formatting() {
        let json_str = r#"{"version":"0.1.0","network":"devnet","block_height":42,"peer_count":3,"synced":true,"timestamp":"2026-01-01T00:00:00Z"}"#;
        let json: serde_json::Value = serde_json::from_str(json_str).unwrap();
        assert_eq!(json["version"].as_str().unwrap(), "0.1.0");
        assert_eq!(json["block_height"].as_u64().unwrap(), 42);
        assert!(json["synced"].as_bool().unwrap());
    }

    #[test]
    fn minimal_url_parses_host_port_path() {
        let url = MinimalUrl::parse("http://127.0.0.1:9741/status").unwrap();
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 9741);
        assert_eq!(url.path, "/status");
    }

    #[test]
    fn minimal_url_defaults_to_port_80() {
        let url = MinimalUrl::parse("http://example.com/status").unwrap();
        assert_eq!(url.port, 80);
    }

    #[test]
    fn node_config_carries_data_dir_override() {
        let args = RunArgs {
            config: None,
            data_dir: PathBuf::from("~/.nova"),
            rpc_port: 9741,
            p2p_port: 9740,
            metrics_port: 9742,
            validator_key: None,
        };
        let resolved = resolve_data_dir(&args.data_dir);
        let config = load_node_config(&args, &resolved).unwrap();
        assert_eq!(config.data_dir, resolved);
    }
}
