//! # guacgate
//!
//! Clientless remote-desktop gateway. Browser clients speak the Guacamole
//! instruction protocol over HTTP long polling or WebSocket; guacgate
//! relays each session onto a guacd proxy daemon, which drives the actual
//! remote-desktop backend (VNC, RDP, SSH, ...).
//!
//! ## Endpoints
//!
//! | Method   | Path                | Description                           |
//! |----------|---------------------|---------------------------------------|
//! | GET/POST | `/tunnel`           | Long-poll tunnel (`?connect`, `?read:<uuid>`, `?write:<uuid>`) |
//! | GET      | `/websocket-tunnel` | WebSocket tunnel, subprotocol `guacamole` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use guacgate_http::{router, AppState};
use guacgate_tunnel::GuacdConnector;
use tokio::net::TcpListener;
use tracing::info;

/// Clientless remote-desktop gateway.
#[derive(Parser)]
#[command(name = "guacgate", version)]
struct Cli {
    /// Address to serve HTTP/WebSocket tunnels on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Address of the guacd proxy daemon.
    #[arg(long, default_value = "127.0.0.1:4822")]
    guacd: String,

    /// Seconds allowed for TCP connect plus the guacd handshake.
    #[arg(long, default_value_t = 15)]
    connect_timeout: u64,

    /// Long-poll idle timeout in seconds before an empty response is sent.
    #[arg(long, default_value_t = 15)]
    read_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("guacgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!("guacd backend at {}", cli.guacd);

    let connector = GuacdConnector::new(cli.guacd)
        .with_timeout(Duration::from_secs(cli.connect_timeout));
    let state = AppState::new(Arc::new(connector))
        .with_read_timeout(Duration::from_secs(cli.read_timeout));
    let app = router(state);

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!("listening on {}", cli.listen);

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    info!("shutting down");
    Ok(())
}
