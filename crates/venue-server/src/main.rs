//! Venue Server
//!
//! # Servers
//!
//! - Websocket server for client sessions (default: 0.0.0.0:9001)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the venue store (Postgres or in-memory)
//! 4. Create the media-transport client
//! 5. Initialize actor system (`VenueControllerHandle`)
//! 6. Start health HTTP server
//! 7. Start websocket server, mark ready
//! 8. Start operator console (optional)
//! 9. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::ExposeSecret;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use venue_server::actors::{ActorMetrics, VenueControllerHandle};
use venue_server::auth::IdentityValidator;
use venue_server::config::{Config, StoreBackend};
use venue_server::media::http::HttpMediaTransport;
use venue_server::media::MediaTransport;
use venue_server::observability::{health_router, init_metrics_recorder, HealthState};
use venue_server::ops::run_console;
use venue_server::server::{router, ServerState};
use venue_server::store::memory::InMemoryVenueStore;
use venue_server::store::postgres::{connect, PgVenueStore};
use venue_server::store::VenueStore;

/// Time allowed for venues to close their routers on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venue_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Venue Server");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        server_id = %config.server_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        store_backend = ?config.store_backend,
        media_handler_url = %config.media_handler_url,
        max_connections = config.max_connections,
        idle_timeout_seconds = config.idle_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let store: Arc<dyn VenueStore> = match (config.store_backend, &config.database_url) {
        (StoreBackend::Postgres, Some(url)) => {
            info!("Connecting to Postgres...");
            let pool = connect(
                url.expose_secret(),
                config.db_max_connections,
                config.run_migrations,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to Postgres");
                e
            })?;
            info!("Postgres connection established");
            Arc::new(PgVenueStore::new(pool))
        }
        (StoreBackend::Postgres, None) => {
            return Err("DATABASE_URL is required for the postgres store".into());
        }
        (StoreBackend::Memory, _) => {
            warn!("Using in-memory venue store; venues are lost on restart");
            Arc::new(InMemoryVenueStore::new())
        }
    };

    let media: Arc<dyn MediaTransport> = Arc::new(
        HttpMediaTransport::new(&config.media_handler_url).map_err(|e| {
            error!(error = %e, "Failed to create media transport client");
            e
        })?,
    );

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let controller_handle = VenueControllerHandle::new(
        config.server_id.clone(),
        Arc::clone(&store),
        media,
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Every server task is cancelled when the controller shuts down
    let shutdown_token = controller_handle.child_token();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Websocket server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let validator = IdentityValidator::new(&config.jwt_secret, config.jwt_clock_skew);
    let server_state = Arc::new(ServerState::new(
        controller_handle.clone(),
        Arc::clone(&store),
        validator,
        Arc::clone(&actor_metrics),
        config.max_connections,
        config.idle_timeout,
    ));
    let ws_app = router(server_state);

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind websocket server");
        format!("Failed to bind websocket server to {ws_addr}: {e}")
    })?;

    let ws_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %ws_addr, "Websocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("Websocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Websocket server failed");
        }
    });

    health_state.set_ready();

    if config.operator_console {
        let console_controller = controller_handle.clone();
        let console_token = shutdown_token.child_token();
        tokio::spawn(async move {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            run_console(input, tokio::io::stdout(), console_controller, console_token).await;
        });
    }

    info!("Venue Server running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Venues close their routers and notify their sessions, then the
    // controller token cancels every listener and connection.
    if let Err(e) = controller_handle.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
        controller_handle.cancel();
    }

    // Give connection tasks time to flush their last frames
    tokio::time::sleep(Duration::from_millis(500)).await;

    info!("Venue Server shutdown complete");
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
