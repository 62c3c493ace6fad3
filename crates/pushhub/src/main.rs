//! # pushhub
//!
//! Push hub server binary: loads settings, installs logging and metrics,
//! starts the hub on a backplane and serves it over HTTP until Ctrl-C or
//! SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pushhub_backplane::{Backplane, MemoryBackplane};
use pushhub_server::{Hub, PushServer};
use pushhub_settings::{PushHubSettings, load_settings, load_settings_from_path};

/// Time allowed for open responses to finish after shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Push hub server.
#[derive(Parser, Debug)]
#[command(name = "pushhub", about = "Real-time push hub over Server-Sent Events")]
struct Cli {
    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Settings file (defaults to `~/.pushhub/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<PushHubSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => load_settings().context("failed to load settings")?,
        };
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            let _ = sigterm.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c"),
        () = terminate() => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    if settings.logging.json {
        pushhub_logging::init_json_subscriber(&settings.logging.level);
    } else {
        pushhub_logging::init_subscriber(&settings.logging.level);
    }

    let metrics = pushhub_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;

    // Single-process transport; a networked backplane plugs in here.
    let backplane: Arc<dyn Backplane> = Arc::new(MemoryBackplane::new());
    let hub = Arc::new(Hub::start(&settings.hub, &settings.bridge, backplane));

    let server = PushServer::new(settings.server.clone(), hub.clone()).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!(
        channel = %settings.hub.channel,
        "push hub listening on http://{addr}"
    );

    shutdown_signal().await?;

    tracing::info!("shutting down...");
    let coordinator = server.shutdown();
    coordinator.shutdown();
    hub.shutdown().await;
    coordinator.track(handle);
    coordinator.graceful_shutdown(Some(SHUTDOWN_TIMEOUT)).await;

    tracing::info!("shutdown complete");
    Ok(())
}
