use axum::{Router, routing::get};
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use marksync_server::{
    config::Config,
    db::{SyncRepo, init_database},
    handlers::{api_routes, ws_handler},
    sync::{EventBridge, Hub, LocalBridge, ServerMessage, SessionSettings, SyncService},
};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marksync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Marksync Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("CORS origins: {:?}", config.cors_origins);

    // Initialize database
    let conn = match Connection::open(&config.database_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_database(&conn) {
        error!("Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    // Create shared state
    let repo = SyncRepo::new(conn);
    let bridge: Arc<dyn EventBridge> = Arc::new(LocalBridge::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hub, hub_handle) = Hub::new(shutdown_rx);
    tokio::spawn(hub.run());

    let service = Arc::new(SyncService::new(
        repo.clone(),
        hub_handle.clone(),
        bridge.clone(),
        config.max_payload_bytes,
    ));

    // Fan in events published by other instances on the bridge
    {
        let bridge = bridge.clone();
        let hub = hub_handle.clone();
        tokio::spawn(async move {
            let mut rx = bridge.subscribe();
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if msg.origin == bridge.instance_id() {
                            continue;
                        }
                        let user_id = msg.event.user_id.clone();
                        let device_id = msg.event.device_id.clone();
                        hub.broadcast_to_user(
                            &user_id,
                            Some(&device_id),
                            ServerMessage::SyncEvent(msg.event),
                        )
                        .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Devices recover via their next sync_request
                        warn!("Bridge subscriber lagged {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Prune delivered events past the retention window
    {
        let repo = repo.clone();
        let retention_days = config.retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let cutoff = Utc::now() - ChronoDuration::days(retention_days);
                match repo.prune_delivered_before(cutoff) {
                    Ok(0) => {}
                    Ok(n) => info!("Pruned {} delivered events", n),
                    Err(e) => warn!("Event pruning failed: {}", e),
                }
            }
        });
    }

    let ws_state = marksync_server::handlers::ws::WsState {
        service: service.clone(),
        hub: hub_handle.clone(),
        settings: SessionSettings {
            heartbeat_interval: config.heartbeat_interval(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            outbound_buffer: config.session_buffer,
        },
    };

    let api_state = marksync_server::handlers::api::ApiState {
        hub: hub_handle.clone(),
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any); // In production, use specific origins from config

    // Build the router
    let app = Router::new()
        // Health check
        .route("/", get(|| async { "Marksync Server" }))
        .route("/health", get(|| async { "OK" }))
        // WebSocket sync endpoint
        .route("/sync", get(ws_handler).with_state(ws_state))
        // API routes
        .nest("/api", api_routes(api_state))
        // Add layers
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Run server; the shutdown signal also stops the hub, which closes
    // every active session
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await
        .unwrap();

    info!("Server shut down gracefully");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
