//! Smart-Door Controller Dashboard
//!
//! Main entry point for the controller application.

use smartdoor::{
    broadcast_hub::{BroadcastHub, HubDoorRelay},
    command_relay::CommandRelay,
    config_store::ConfigStore,
    device_client::{DoorActuator, Esp32Client},
    event_log::{BoundedLog, ACCESS_LOG_CAPACITY, NOTIFICATION_LOG_CAPACITY},
    image_store::ImageStore,
    recognition::RecognitionPipeline,
    recognizer::{HttpRecognizer, Recognizer},
    state::{AppConfig, AppState},
    task_runner::{TaskRunner, DEFAULT_WORKERS},
    telegram::{Notifier, TelegramClient},
    temp_store::TempFileStore,
    web_api,
};
use smartdoor::command_relay::{CommandSource, DoorController};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartdoor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Smart-Door Controller v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        device_ip = %config.device_ip,
        recognizer_url = %config.recognizer_url,
        upload_dir = %config.upload_dir.display(),
        temp_dir = %config.temp_dir.display(),
        "Configuration loaded"
    );

    // Initialize components
    let temp_store = Arc::new(TempFileStore::new(config.temp_dir.clone())?);
    let image_store = Arc::new(ImageStore::new(
        config.upload_dir.clone(),
        config.known_faces_dir.clone(),
    )?);
    tracing::info!("Storage directories ready");

    let access_log = Arc::new(BoundedLog::new(ACCESS_LOG_CAPACITY));
    let notification_log = Arc::new(BoundedLog::new(NOTIFICATION_LOG_CAPACITY));
    let hub = Arc::new(BroadcastHub::new());

    let config_store = Arc::new(ConfigStore::new(config.bot_config_path.clone()));
    let bot_config = Arc::new(RwLock::new(config_store.load().await));
    tracing::info!(
        configured = bot_config.read().await.is_configured(),
        "Bot configuration loaded"
    );

    let telegram = Arc::new(TelegramClient::new(bot_config.clone()));
    let esp32 = Arc::new(Esp32Client::new(config.device_ip.clone()));
    let recognizer = Arc::new(HttpRecognizer::new(config.recognizer_url.clone()));

    let task_runner = Arc::new(TaskRunner::new(DEFAULT_WORKERS));
    tracing::info!(workers = DEFAULT_WORKERS, "Task runner started");

    let pipeline = Arc::new(RecognitionPipeline::new(
        recognizer.clone() as Arc<dyn Recognizer>,
        telegram.clone() as Arc<dyn Notifier>,
        esp32.clone() as Arc<dyn DoorActuator>,
        access_log.clone(),
        notification_log.clone(),
        hub.clone(),
        temp_store.clone(),
        image_store.clone(),
    ));
    tracing::info!("Recognition pipeline initialized");

    // Telegram /open is relayed to the dashboard over the hub; the
    // dashboard performs the actual door command.
    let door_relay = Arc::new(HubDoorRelay::new(hub.clone()));
    let relay = Arc::new(CommandRelay::new(
        telegram.clone() as Arc<dyn CommandSource>,
        telegram.clone() as Arc<dyn Notifier>,
        door_relay as Arc<dyn DoorController>,
        bot_config.clone(),
    ));
    relay.start().await;

    // Create application state
    let state = AppState {
        access_log,
        notification_log,
        hub,
        temp_store: temp_store.clone(),
        image_store: image_store.clone(),
        task_runner,
        pipeline,
        esp32,
        telegram,
        relay: relay.clone(),
        config_store,
    };

    // Create router with image serving
    let app = web_api::create_router(state.clone())
        .nest_service("/uploads", ServeDir::new(image_store.upload_dir()))
        .nest_service("/known_faces", ServeDir::new(image_store.known_faces_dir()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Orderly shutdown: stop the command listener, then sweep temp files
    relay.stop().await;
    temp_store.release_all();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
