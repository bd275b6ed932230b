use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_graceful::ShutdownGuard;

use crate::telemetry_logic::commands::command_handler;
use crate::telemetry_logic::config::Settings;
use crate::telemetry_logic::state::AppState;

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/resources/{id}/{command}", post(command_handler))
        .with_state(app_state)
}

pub async fn run(settings: Settings, app_state: AppState, shutdown_guard: ShutdownGuard) -> Result<()> {
    let app = router(app_state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    if let Some((cert_path, key_path)) = settings.tls {
        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .with_context(|| format!("failed to load TLS configuration from {}", cert_path.display()))?;
        tracing::info!("Downstream server listening on {} (tls)", addr);

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let guard = shutdown_guard.clone();
        tokio::spawn(async move {
            guard.cancelled().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!("Downstream server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_guard.cancelled().await;
                tracing::info!("Downstream server shutting down.");
            })
            .await
            .context("server failed")?;
    }

    app_state.lifecycle().shutdown();
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let gateway = &state.gateway;
    let (mut conn, mut outbound) = gateway.open();
    tracing::info!(conn_id = conn.id, "Client connected");

    loop {
        tokio::select! {
            // Frames from the client
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        gateway.handle_text(&mut conn, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = conn.id, error = %e, "socket error");
                        break;
                    }
                }
            }
            // Frames queued for this connection by the hub
            queued = outbound.recv() => {
                let Some(frame) = queued else { break };
                if socket.send(Message::Text(frame.to_text().into())).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    }

    gateway.close(&conn);
    tracing::info!(conn_id = conn.id, "Client disconnected");
}
