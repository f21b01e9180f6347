//! Chat gateway service entry point.
//!
//! WebSocket and HTTP front end for marketplace chat: persistent
//! messaging with broker-based fan-out across instances.

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use broker::{Broker, MemoryBroker, NatsBroker};
use chat_store::Database;
use gateway::{
    create_router, AppState, CredentialValidator, FanoutListener, HttpCredentialValidator,
    MessageDispatcher, SessionRegistry, StaticCredentialValidator,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting chat gateway");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let db_path = env::var("CHAT_DB_PATH").unwrap_or_else(|_| "chat.db".to_string());
    let broker_kind = env::var("CHAT_BROKER").unwrap_or_else(|_| "nats".to_string());
    let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let auth_mode = env::var("AUTH_MODE").unwrap_or_else(|_| "remote".to_string());
    let auth_service_url =
        env::var("AUTH_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());

    info!("configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  CHAT_DB_PATH: {}", db_path);
    info!("  CHAT_BROKER: {}", broker_kind);
    info!("  NATS_URL: {}", nats_url);
    info!("  AUTH_MODE: {}", auth_mode);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Open the chat store
    let store = Arc::new(Database::open_at(Path::new(&db_path))?);

    // Connect the fan-out broker
    let broker_impl: Arc<dyn Broker> = match broker_kind.as_str() {
        "memory" => {
            info!("using in-process broker (single-instance deployment)");
            Arc::new(MemoryBroker::new())
        }
        _ => {
            info!("connecting to NATS at {}", nats_url);
            Arc::new(NatsBroker::connect(&nats_url).await?)
        }
    };

    // Pick the credential validator
    let validator: Arc<dyn CredentialValidator> = match auth_mode.as_str() {
        "static" => {
            let tokens = env::var("AUTH_TOKENS").unwrap_or_default();
            info!("using static credential validator");
            Arc::new(StaticCredentialValidator::from_spec(&tokens))
        }
        _ => {
            info!("validating credentials against {}", auth_service_url);
            Arc::new(HttpCredentialValidator::new(auth_service_url))
        }
    };

    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(store, broker_impl.clone()));

    // Spawn the per-process fan-out listener
    let listener = Arc::new(FanoutListener::new(registry.clone(), broker_impl));
    let (fanout_shutdown_tx, fanout_shutdown_rx) = mpsc::channel(1);
    let fanout_handle = tokio::spawn(async move {
        if let Err(e) = listener.run(fanout_shutdown_rx).await {
            error!("fan-out listener error: {:?}", e);
        }
    });

    let state = Arc::new(AppState {
        registry,
        dispatcher,
        validator,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let tcp_listener = TcpListener::bind(addr).await?;
    info!("chat gateway listening on {}", addr);

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down fan-out listener...");
    let _ = fanout_shutdown_tx.send(()).await;
    let _ = fanout_handle.await;

    info!("chat gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
