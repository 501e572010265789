//! CLI entry point: parse flags/config, wire up the session registry, worker
//! registry, and dispatcher, then block serving connections until a signal
//! asks us to stop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use smscr_server::config::{
    self, ServerConfig, KEY_ADDRESS, KEY_DOCUMENT_ROOT, KEY_PORT, KEY_SESSION_TIMEOUT,
    KEY_WORKER_THREADS,
};
use smscr_server::server::{self, Dispatcher};
use smscr_server::session::{spawn_sweeper, SessionRegistry};
use smscr_server::workers::WorkerRegistry;

/// A template-script HTTP server.
#[derive(Parser, Debug)]
#[command(name = "smscr-server", version, about)]
struct Cli {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long = "worker-threads")]
    worker_threads: Option<usize>,

    #[arg(long = "session-timeout")]
    session_timeout: Option<u64>,

    #[arg(long = "document-root")]
    document_root: Option<PathBuf>,

    /// Path to an `ext=type` MIME mapping file, merged over the built-in table.
    #[arg(long = "mime-config")]
    mime_config: Option<PathBuf>,

    /// Path to a `path=identifier` worker mapping file.
    #[arg(long = "workers-config")]
    workers_config: Option<PathBuf>,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => ServerConfig::from_toml_file(path).unwrap_or_else(|e| {
            tracing::error!(?e, "failed to load config file, falling back to defaults");
            ServerConfig::default()
        }),
        None => ServerConfig::default(),
    };

    let mut keys: HashMap<String, String> = HashMap::new();
    if let Some(v) = &cli.address {
        keys.insert(KEY_ADDRESS.to_string(), v.clone());
    }
    if let Some(v) = cli.port {
        keys.insert(KEY_PORT.to_string(), v.to_string());
    }
    if let Some(v) = cli.worker_threads {
        keys.insert(KEY_WORKER_THREADS.to_string(), v.to_string());
    }
    if let Some(v) = cli.session_timeout {
        keys.insert(KEY_SESSION_TIMEOUT.to_string(), v.to_string());
    }
    if let Some(v) = &cli.document_root {
        keys.insert(KEY_DOCUMENT_ROOT.to_string(), v.display().to_string());
    }
    if !keys.is_empty() {
        let mime_config = match &cli.mime_config {
            Some(path) => config::load_mapping_file(path).unwrap_or_default(),
            None => cfg.mime_overrides.clone(),
        };
        let workers_config = match &cli.workers_config {
            Some(path) => config::load_mapping_file(path).unwrap_or_default(),
            None => cfg.workers.clone(),
        };
        // CLI flags win over whatever the config file set for the same key.
        let mut merged = HashMap::new();
        merged.insert(KEY_ADDRESS.to_string(), cfg.address.clone());
        merged.insert(KEY_PORT.to_string(), cfg.port.to_string());
        merged.insert(KEY_WORKER_THREADS.to_string(), cfg.worker_threads.to_string());
        merged.insert(KEY_SESSION_TIMEOUT.to_string(), cfg.session_timeout_secs.to_string());
        merged.insert(KEY_DOCUMENT_ROOT.to_string(), cfg.document_root.display().to_string());
        merged.extend(keys);
        cfg = ServerConfig::from_keys(&merged, mime_config, workers_config)
            .expect("CLI-provided values must parse");
    }

    tracing::info!(?cfg, "starting server");

    let sessions = Arc::new(SessionRegistry::new(cfg.session_timeout_secs));
    let shutdown = Arc::new(AtomicBool::new(false));

    let sweeper = spawn_sweeper(sessions.clone(), Duration::from_secs(300), shutdown.clone());

    let bind_addr = format!("{}:{}", cfg.address, cfg.port);
    let worker_threads = cfg.worker_threads;
    let session_timeout_secs = cfg.session_timeout_secs;
    let dispatcher = Arc::new(Dispatcher::new(cfg, WorkerRegistry::with_demo_workers(), sessions)?);

    server::serve(dispatcher, &bind_addr, worker_threads, session_timeout_secs, shutdown)?;
    let _ = sweeper.join();
    Ok(())
}
