//! Door Device Adapter
//!
//! ## Responsibilities
//!
//! - Send open-door commands to the ESP32 door module
//! - Pull camera captures from the device
//! - Runtime-mutable device address (settings endpoint)
//!
//! All calls are best-effort: failures become a `DoorCommandResult` or
//! `None`, never an error the caller has to handle.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of a door command
#[derive(Debug, Clone, Serialize)]
pub struct DoorCommandResult {
    pub success: bool,
    pub message: String,
}

/// Remote door/camera device boundary
#[async_trait]
pub trait DoorActuator: Send + Sync {
    async fn open_door(&self) -> DoorCommandResult;
    async fn capture_image(&self) -> Option<Vec<u8>>;
}

/// HTTP client for the ESP32 door module
pub struct Esp32Client {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    device_ip: RwLock<String>,
}

impl Esp32Client {
    pub fn new(device_ip: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        let probe_client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            probe_client,
            device_ip: RwLock::new(device_ip),
        }
    }

    pub async fn device_ip(&self) -> String {
        self.device_ip.read().await.clone()
    }

    pub async fn set_device_ip(&self, ip: String) {
        let mut device_ip = self.device_ip.write().await;
        tracing::info!(ip = %ip, "Device IP updated");
        *device_ip = ip;
    }

    /// Quick connectivity probe used by the camera-status endpoint
    pub async fn is_online(&self) -> bool {
        let ip = self.device_ip().await;
        match self
            .probe_client
            .get(format!("http://{ip}/capture"))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl DoorActuator for Esp32Client {
    async fn open_door(&self) -> DoorCommandResult {
        let ip = self.device_ip().await;
        match self
            .client
            .get(format!("http://{ip}/control?action=open"))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(ip = %ip, "Open command sent to door device");
                DoorCommandResult {
                    success: true,
                    message: "Door opened successfully".to_string(),
                }
            }
            Ok(response) => {
                tracing::warn!(ip = %ip, status = %response.status(), "Door device rejected open command");
                DoorCommandResult {
                    success: false,
                    message: format!("Device error: {}", response.status()),
                }
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Door device unreachable");
                DoorCommandResult {
                    success: false,
                    message: format!("Connection error: {e}"),
                }
            }
        }
    }

    async fn capture_image(&self) -> Option<Vec<u8>> {
        let ip = self.device_ip().await;
        let response = match self.client.get(format!("http://{ip}/capture")).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(ip = %ip, status = %response.status(), "Device capture failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Device capture failed");
                return None;
            }
        };
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Failed to read capture body");
                None
            }
        }
    }
}
