//! posthub server - Main entry point.
//!
//! This binary starts the posthub server with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`posthub_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! POSTHUB_JWT_SECRET="change-me" \
//! PORT=8080 \
//! cargo run --release --bin posthub-server
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use posthub_server::config::Config;
use posthub_server::hub::{Hub, HubConfig};
use posthub_server::routes::{create_router, AppState};

/// How long to wait for WebSocket clients to be released on shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  POSTHUB_JWT_SECRET          - HMAC secret for bearer tokens");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                        - HTTP server port (default: 8080)");
            eprintln!("  POSTHUB_SEND_QUEUE_CAPACITY - Messages buffered per client (default: 64)");
            eprintln!("  POSTHUB_PAGE_SIZE           - Posts per page (default: 10)");
            eprintln!("  RUST_LOG                    - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        send_queue_capacity = config.send_queue_capacity,
        page_size = config.page_size,
        "posthub server starting"
    );

    let (hub, hub_task) = Hub::spawn(HubConfig::default());
    let app = create_router(AppState::new(config.clone(), hub.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port = config.port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");

    // Upgraded connections outlive the HTTP server. Closing them ends their
    // tasks, which releases the remaining hub handles.
    let members = hub.members().await;
    for connection in members.iter() {
        connection.close();
    }
    info!(count = members.len(), "Closed WebSocket connections");
    drop(members);
    drop(hub);

    match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, hub_task).await {
        Ok(Ok(())) => info!("Hub actor stopped"),
        Ok(Err(err)) => error!(error = %err, "Hub actor failed"),
        Err(_) => warn!(
            timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT.as_secs(),
            "Hub actor did not stop in time"
        ),
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT (Ctrl+C) is received.
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
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
