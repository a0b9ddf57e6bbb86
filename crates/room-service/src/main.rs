//! Listening Room
//!
//! Real-time coordination server: one shared playback position pushed to
//! every listener, and a moderated chat relay with an optional external
//! agent.
//!
//! # Servers
//!
//! - HTTP/WebSocket server for `/ws/music`, `/ws/chat`, and the admin API
//!   (default: 0.0.0.0:8000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Assemble the room (registry, moderation, relay, store, clock)
//! 4. Start health HTTP server
//! 5. Bind the public listener and start the clock task
//! 6. Mark ready and wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use room_service::config::Config;
use room_service::observability::metrics::init_metrics_recorder;
use room_service::observability::{health_router, HealthState};
use room_service::room::{Collaborators, Room};
use room_service::routes::build_routes;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the clock task gets to stop after shutdown begins.
const CLOCK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Listening Room");

    let config = Config::from_env()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))
        .context("loading configuration")?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        tracks = config.playlist.len(),
        track_duration_seconds = config.track_duration_seconds,
        banned_words = config.banned_words.len(),
        agent_enabled = config.agent_address.is_some(),
        agent_timeout_ms = config.agent_timeout_ms,
        chat_history_capacity = config.chat_history_capacity,
        subscriber_buffer = config.subscriber_buffer,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let room = Room::build(
        &config,
        Collaborators::from_config(&config),
        shutdown_token.clone(),
    )
    .inspect_err(|e| error!(error = %e, "Failed to assemble room"))
    .context("assembling room")?;

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .inspect_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        })
        .context("parsing health bind address")?;

    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .inspect_err(|e| error!(error = %e, addr = %health_addr, "Failed to bind health server"))
        .with_context(|| format!("binding health server to {health_addr}"))?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Public server
    let bind_addr: SocketAddr = config
        .bind_address
        .parse()
        .inspect_err(|e| error!(error = %e, addr = %config.bind_address, "Invalid bind address"))
        .context("parsing bind address")?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .inspect_err(|e| error!(error = %e, addr = %bind_addr, "Failed to bind public server"))
        .with_context(|| format!("binding public server to {bind_addr}"))?;

    let (state, clock_task) = room.start();
    let app = build_routes(state, config.cors_allow_any_origin);

    let server_shutdown_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        info!(addr = %bind_addr, "Public server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("Public server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Public server failed");
        }
    });

    health_state.set_ready();
    info!("Listening Room running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Propagates to the clock, every connection, and both servers
    shutdown_token.cancel();

    if tokio::time::timeout(CLOCK_SHUTDOWN_TIMEOUT, clock_task)
        .await
        .is_err()
    {
        warn!("Clock task did not stop in time");
    }
    if let Err(e) = server_task.await {
        warn!(error = %e, "Public server task ended abnormally");
    }
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Listening Room shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
