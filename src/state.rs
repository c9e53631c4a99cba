//! Application configuration and shared state

use crate::broadcast_hub::BroadcastHub;
use crate::command_relay::CommandRelay;
use crate::config_store::ConfigStore;
use crate::device_client::Esp32Client;
use crate::event_log::BoundedLog;
use crate::image_store::ImageStore;
use crate::models::{AccessRecord, Notification};
use crate::recognition::RecognitionPipeline;
use crate::task_runner::TaskRunner;
use crate::telegram::TelegramClient;
use crate::temp_store::TempFileStore;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Environment-driven startup configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub known_faces_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub device_ip: String,
    pub recognizer_url: String,
    pub bot_config_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "5000").parse().unwrap_or(5000),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "uploads")),
            known_faces_dir: PathBuf::from(env_or("KNOWN_FACES_DIR", "known_faces")),
            temp_dir: PathBuf::from(env_or("TEMP_DIR", "temp")),
            device_ip: env_or("DEVICE_IP", "192.168.0.100"),
            recognizer_url: env_or("RECOGNIZER_URL", "http://127.0.0.1:5001"),
            bot_config_path: PathBuf::from(env_or("BOT_CONFIG_PATH", "telegram_config.json")),
        }
    }
}

/// Shared application state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub access_log: Arc<BoundedLog<AccessRecord>>,
    pub notification_log: Arc<BoundedLog<Notification>>,
    pub hub: Arc<BroadcastHub>,
    pub temp_store: Arc<TempFileStore>,
    pub image_store: Arc<ImageStore>,
    pub task_runner: Arc<TaskRunner>,
    pub pipeline: Arc<RecognitionPipeline>,
    pub esp32: Arc<Esp32Client>,
    pub telegram: Arc<TelegramClient>,
    pub relay: Arc<CommandRelay>,
    pub config_store: Arc<ConfigStore>,
}
