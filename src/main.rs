//! relay-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use relay_gateway::app_state::{AppState, StateParts};
use relay_gateway::build_app;
use relay_gateway::config::GatewayConfig;
use relay_gateway::identity::{IdentityResolver, JwtResolver, StaticTokenResolver};
use relay_gateway::persistence::{EventLog, InMemoryEventLog, PostgresEventLog};
use relay_gateway::ws::ConnectionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("invalid LISTEN_ADDR")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(addr = %config.listen_addr, "starting relay-gateway");

    let event_log: Arc<dyn EventLog> = match &config.database_url {
        Some(url) => {
            let log = PostgresEventLog::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to the event log database")?;
            tracing::info!("event log: postgres");
            Arc::new(log)
        }
        None => {
            tracing::info!("event log: in-memory");
            Arc::new(InMemoryEventLog::new())
        }
    };

    let identity: Arc<dyn IdentityResolver> = match &config.auth_jwt_secret {
        Some(secret) => {
            tracing::info!("identity: jwt");
            Arc::new(JwtResolver::new(secret.as_bytes()))
        }
        None => {
            let resolver = StaticTokenResolver::parse(&config.auth_static_tokens);
            if resolver.is_empty() {
                tracing::warn!("no AUTH_JWT_SECRET or AUTH_STATIC_TOKENS set, every token will be rejected");
            }
            Arc::new(resolver)
        }
    };

    let state = AppState::build(StateParts {
        event_log,
        log_events: config.event_log_enabled,
        identity,
        settings: config.connection_settings(),
        handler_timeout: config.handler_timeout(),
    })
    .await;

    let connections = Arc::clone(&state.connections);
    let heartbeat = connections.spawn_heartbeat();

    let app = build_app(state, config.request_timeout());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&connections)))
        .await
        .context("server error")?;

    heartbeat.abort();
    tracing::info!("relay-gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C after closing every WebSocket connection.
async fn shutdown_signal(connections: Arc<ConnectionManager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    let closed = connections.shutdown().await;
    tracing::info!(closed, "shutting down");
}
