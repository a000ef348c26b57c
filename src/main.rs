//! CLI entry point.
//!
//! Grounded on `pymock/main.py`: two listeners (mock + control plane)
//! sharing one config directory, the KV store sweeper started once at
//! boot, and a graceful shutdown on `SIGTERM`/Ctrl-C. `clap`'s derive API
//! mirrors the flag names `pymock/main.py` defines via `argparse`
//! (`-mp`, `-cp`, `-wd`, `-p`, `-addr`, `--verbose`); `-https` is accepted
//! for forward compatibility but currently logs a warning and falls back
//! to plain HTTP (spec §3 Open Question: TLS termination is deferred).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use relaymock::config::{load_config, Config};
use relaymock::control::{self, ControlPlane};
use relaymock::forward::ForwardClient;
use relaymock::mock::MockEngine;
use relaymock::registry::TunnelRegistry;
use relaymock::reload;
use relaymock::rules::{RuleTable, RuleTableHandle};
use relaymock::store::Store;

#[derive(Parser, Debug)]
#[command(name = "relaymock", about = "Mock HTTP server and TCP tunnel engine")]
struct Cli {
    /// Enable debug-level logging.
    #[arg(long)]
    verbose: bool,

    /// Port the mock HTTP listener binds to.
    #[arg(short = 'm', long = "mp", default_value_t = 8080)]
    mock_port: u16,

    /// Port the control plane binds to.
    #[arg(short = 'c', long = "cp", default_value_t = 80)]
    control_port: u16,

    /// Directory containing `config.json` and `recordings/`.
    #[arg(short = 'w', long = "wd", default_value = ".")]
    working_dir: PathBuf,

    /// Basic-auth password gating the control plane. Unset disables auth.
    #[arg(short = 'p', long = "password")]
    password: Option<String>,

    /// Bind address for both listeners.
    #[arg(long = "addr", default_value = "0.0.0.0")]
    addr: String,

    /// Request TLS termination on the control plane (currently a no-op;
    /// see module docs).
    #[arg(long = "https")]
    https: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let ws_logs = relaymock::logging::init(cli.verbose);

    if cli.https {
        tracing::warn!("-https was requested but TLS termination is not yet implemented; serving plain HTTP");
    }

    std::env::set_current_dir(&cli.working_dir)?;
    let base_dir = std::env::current_dir()?;

    let config_path = reload::config_path(&base_dir);
    ensure_scaffold(&config_path, &base_dir.join("recordings"))?;

    let config: Config = load_config(&config_path)?;

    let store = Store::new();
    store.spawn_sweeper();

    let client: Arc<ForwardClient> = Arc::new(hyper::Client::new());

    let rule_table = RuleTable::build(&config, &base_dir, store.clone(), client.clone())?;
    let rules = RuleTableHandle::new(rule_table);

    let tunnels = Arc::new(TunnelRegistry::new(store.clone()));
    tunnels.reload(&config, &base_dir).await?;

    let mock_engine = MockEngine::new(rules.clone(), store.clone(), base_dir.join("recordings"));
    let mock_addr: SocketAddr = format!("{}:{}", cli.addr, cli.mock_port).parse()?;

    let control_state = Arc::new(ControlPlane {
        rules: rules.clone(),
        tunnels: tunnels.clone(),
        base_dir: base_dir.clone(),
        store: store.clone(),
        ws_logs,
        password: cli.password.clone(),
        client: client.clone(),
    });
    let control_addr: SocketAddr = format!("{}:{}", cli.addr, cli.control_port).parse()?;

    tracing::info!(%mock_addr, %control_addr, "relaymock starting");

    let mock_task = tokio::spawn(relaymock::mock::serve(mock_addr, mock_engine));
    let control_task = tokio::spawn(control::serve(control_addr, control_state));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, exiting");
    mock_task.abort();
    control_task.abort();

    Ok(())
}

/// Creates `config.json` (as an empty but valid document) and the
/// `recordings/` directory if either is missing, matching
/// `pymock/main.py`'s startup behavior of never failing just because a
/// fresh working directory hasn't been scaffolded yet.
fn ensure_scaffold(config_path: &std::path::Path, recordings_dir: &std::path::Path) -> std::io::Result<()> {
    if !config_path.exists() {
        std::fs::write(config_path, b"{\"mock\": [], \"tunnel\": {\"mappings\": []}}\n")?;
    }
    std::fs::create_dir_all(recordings_dir)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
