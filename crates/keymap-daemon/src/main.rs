//! keymapd: remote keymap editing daemon.
//!
//! Loads the keymap from persistent storage and serves the two host
//! protocols until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! keymapd [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [default: platform config dir]
//!   --stream-listen <ADDR>   Command stream address [default: from config]
//!   --report-listen <ADDR>   Feature report address [default: from config]
//!   --backend <blob|entry>   Persistence strategy [default: from config]
//!   --print-config           Print the effective config as TOML and exit
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config, apply CLI overrides
//!  └─ bootstrap::build_editor()      -- registry, store, load + repoint
//!  └─ start services
//!       ├─ run_stream_bridge   (TCP, one worker)
//!       └─ run_report_bridge   (TCP, report dispatcher)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keymap_daemon::application::persistence::BackendKind;
use keymap_daemon::infrastructure::bootstrap::{build_dispatcher, build_editor, open_backend};
use keymap_daemon::infrastructure::network::{run_report_bridge, run_stream_bridge};
use keymap_daemon::infrastructure::storage::config::{
    config_file_path, default_data_dir, load_config_from, render_config, AppConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Remote keymap editing daemon.
#[derive(Debug, Parser)]
#[command(name = "keymapd", about = "Remote keymap configuration daemon", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "KEYMAPD_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the framed command stream, overriding `daemon.stream_listen`.
    #[arg(long, env = "KEYMAPD_STREAM_LISTEN")]
    stream_listen: Option<String>,

    /// Address for feature reports, overriding `daemon.report_listen`.
    #[arg(long, env = "KEYMAPD_REPORT_LISTEN")]
    report_listen: Option<String>,

    /// Persistence strategy, overriding `storage.backend`.
    #[arg(long, env = "KEYMAPD_BACKEND")]
    backend: Option<BackendKind>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    ///
    /// A relative or missing `storage.path` resolves next to the config file.
    fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config_file_path().context("cannot locate the default config file")?,
        };
        let mut config = load_config_from(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        if let Some(addr) = &self.stream_listen {
            config.daemon.stream_listen = addr.clone();
        }
        if let Some(addr) = &self.report_listen {
            config.daemon.report_listen = addr.clone();
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.storage.path = Some(match config.storage.path.take() {
            Some(dir) if dir.is_relative() => base.join(dir),
            Some(dir) => dir,
            None => default_data_dir(&path),
        });
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    if cli.print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level)),
        )
        .init();

    info!("keymapd starting");

    let backend = open_backend(&config.storage);
    let (editor, outcome) =
        build_editor(&config.keymap, backend).context("failed to initialise the keymap store")?;
    info!(?outcome, "keymap loaded");
    let dispatcher = Arc::new(build_dispatcher(editor.clone()));

    let stream_listener = TcpListener::bind(&config.daemon.stream_listen)
        .await
        .with_context(|| {
            format!("failed to bind command stream listener on {}", config.daemon.stream_listen)
        })?;
    let report_listener = TcpListener::bind(&config.daemon.report_listen)
        .await
        .with_context(|| {
            format!("failed to bind report listener on {}", config.daemon.report_listen)
        })?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let (stream_result, report_result) = tokio::join!(
        run_stream_bridge(stream_listener, editor, Arc::clone(&running)),
        run_report_bridge(report_listener, dispatcher, Arc::clone(&running)),
    );
    stream_result.context("command stream bridge failed")?;
    report_result.context("report bridge failed")?;

    info!("keymapd stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
