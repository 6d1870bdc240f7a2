//! Sestrack Web Server - SES event tracking webhook receiver.
//!
//! This binary serves the SNS webhook endpoint:
//! - Validates each delivery (size, rate, source IP, freshness, signature)
//! - Correlates SES events to tracked email logs
//! - Applies the status state machine and appends the audit trail
//! - Broadcasts tracking updates to the configured AMQP queue

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sestrack::notify::{AmqpSink, NotificationSink, NullSink};
use sestrack::track::{LogStore, MemoryStore};
use sestrack::web::{router, AppState};
use sestrack::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        tracking_enabled = config.tracking_enabled,
        ses_events_enabled = config.ses_events_enabled,
        verify_signature = config.verify_signature,
        check_source_ip = config.check_source_ip,
        rate_limit_enabled = config.rate_limit_enabled,
        amqp_configured = config.amqp_url.is_some(),
        "config_loaded"
    );

    // Single-node store; swap behind LogStore for a database deployment
    let store: Arc<dyn LogStore> = Arc::new(MemoryStore::new());

    let amqp_sink = config.amqp_url.clone().map(AmqpSink::new);
    let sink: Arc<dyn NotificationSink> = match amqp_sink.clone() {
        Some(sink) => Arc::new(sink),
        None => Arc::new(NullSink),
    };

    // Create application state and router
    let state = AppState::new(config.clone(), store, sink);
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(sink) = amqp_sink {
        sink.close().await;
    }

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
