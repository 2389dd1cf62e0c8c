use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::cors::CorsLayer;

use tick_relay::api::{create_api_router, ApiState};
use tick_relay::config::{Config, STATS_INTERVAL_SECS, VIEWER_PATH};
use tick_relay::relay::{FeedConnector, RelayHandle, RelayService, RelaySettings};
use tick_relay::websocket::ViewerHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Start the relay and its upstream connection
    let connector = Arc::new(FeedConnector::new(config.feed_url()));
    let (relay, relay_task) = RelayService::start(RelaySettings::from(&config), connector);

    start_background_tasks(relay.clone());

    // Start API server
    let api_router = create_api_router(ApiState { relay: relay.clone() })
        .layer(CorsLayer::permissive());

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("HTTP API server running at http://{}", config.api_bind_address);

    let api_server = axum::serve(api_listener, api_router).into_future();

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.bind_address).await?;
    info!("Viewer WebSocket server running at ws://{}{}", config.bind_address, VIEWER_PATH);

    let ws_relay = relay.clone();
    let websocket_server = async move {
        while let Ok((stream, addr)) = ws_listener.accept().await {
            let handler = ViewerHandler::new(ws_relay.clone(), addr.to_string());
            tokio::spawn(handler.handle_connection(stream));
        }
    };

    tokio::select! {
        result = api_server => {
            error!("API server stopped: {:?}", result);
        }
        _ = websocket_server => {
            error!("WebSocket server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    if relay.stop().await.is_ok() {
        let _ = relay_task.await;
    }

    Ok(())
}

fn start_background_tasks(relay: RelayHandle) {
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            interval_timer.tick().await;
            let snapshot = relay.snapshot();

            if snapshot.viewers > 0 || !snapshot.subscribed.is_empty() {
                info!(
                    "Stats - Viewers: {}, Symbols: {}, Upstream ready: {}",
                    snapshot.viewers,
                    snapshot.subscribed.len(),
                    snapshot.upstream_ready
                );
            }
        }
    });

    info!("Started stats monitoring task (every {} seconds)", STATS_INTERVAL_SECS);
}
