//! # Telemetry Server
//!
//! Serves the telemetry hub over WebSocket (`/ws`) and the resource command
//! API (`POST /api/resources/{id}/{command}`) from a single listener.
//!
//! Settings are layered defaults < `server_telemetry.conf` < environment / CLI.
//! The listener switches to TLS when both certificate files exist.

use std::time::Duration;

use anyhow::Result;
use tokio_graceful::Shutdown;
use tracing::{error, info};

mod telemetry_logic;
use telemetry_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config()?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    info!(port = settings.port, tls = settings.tls.is_some(), "starting telemetry server");

    let app_state = state::AppState::build(&settings)?;

    let shutdown: Shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| async move {
        if let Err(e) = downstream::run(settings, app_state, guard).await {
            error!("downstream server stopped: {e:#}");
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}
