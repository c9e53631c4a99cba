//! Telegram Adapter
//!
//! ## Responsibilities
//!
//! - Best-effort visitor/system notifications (sendMessage / sendPhoto)
//! - Command-source implementation over getUpdates long polling
//!
//! Notification failures are reported as `false`, never as errors; the
//! poll client timeout sits slightly above the server-side wait so an
//! empty long poll surfaces as `FetchError::Timeout`, not a failure.

use crate::command_relay::{CommandSource, CommandUpdate, FetchError, POLL_WAIT_SECS};
use crate::config_store::BotConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
/// Client-side poll timeout; must exceed the server-side wait
const POLL_CLIENT_TIMEOUT: Duration = Duration::from_secs(POLL_WAIT_SECS + 5);

/// Best-effort outbound notification boundary
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_visitor(
        &self,
        access_granted: bool,
        recognized_person: Option<&str>,
        image_path: &Path,
    ) -> bool;

    async fn notify_text(&self, message: &str) -> bool;

    async fn notify_door_opened(&self, method: &str) -> bool;
}

/// Bot status as reported to the settings UI
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub configured: bool,
    pub enabled: bool,
    pub chat_id: String,
    pub has_token: bool,
}

/// Telegram Bot API client
pub struct TelegramClient {
    client: reqwest::Client,
    poll_client: reqwest::Client,
    config: Arc<RwLock<BotConfig>>,
}

impl TelegramClient {
    pub fn new(config: Arc<RwLock<BotConfig>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        let poll_client = reqwest::Client::builder()
            .timeout(POLL_CLIENT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            poll_client,
            config,
        }
    }

    async fn config(&self) -> BotConfig {
        self.config.read().await.clone()
    }

    pub async fn status(&self) -> BotStatus {
        let config = self.config().await;
        BotStatus {
            configured: config.is_configured(),
            enabled: config.enabled,
            chat_id: config.chat_id,
            has_token: !config.bot_token.is_empty(),
        }
    }

    /// Send a text message to the authorized chat
    pub async fn send_message(&self, text: &str) -> bool {
        let config = self.config().await;
        if !config.enabled || !config.is_configured() {
            return false;
        }

        let url = format!("{API_BASE}/bot{}/sendMessage", config.bot_token);
        let body = serde_json::json!({
            "chat_id": config.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Telegram message sent");
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Telegram sendMessage rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Telegram sendMessage failed");
                false
            }
        }
    }

    /// Send a photo with caption to the authorized chat
    pub async fn send_photo(&self, image_path: &Path, caption: &str) -> bool {
        let config = self.config().await;
        if !config.enabled || !config.is_configured() {
            return false;
        }

        let data = match tokio::fs::read(image_path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %image_path.display(), error = %e, "Photo not readable");
                return false;
            }
        };
        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.jpg")
            .to_string();
        let part = match Part::bytes(data).file_name(file_name).mime_str("image/jpeg") {
            Ok(part) => part,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build photo part");
                return false;
            }
        };
        let form = Form::new()
            .text("chat_id", config.chat_id)
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", part);

        let url = format!("{API_BASE}/bot{}/sendPhoto", config.bot_token);
        match self.client.post(&url).multipart(form).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Telegram photo sent");
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Telegram sendPhoto rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Telegram sendPhoto failed");
                false
            }
        }
    }

    pub async fn send_test_notification(&self) -> bool {
        let message = format!(
            "🧪 <b>Test Smart Door</b>\n\n\
             ✅ Notificările Telegram funcționează!\n\
             🕐 {}",
            Utc::now().format("%H:%M:%S"),
        );
        self.send_message(&message).await
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify_visitor(
        &self,
        access_granted: bool,
        recognized_person: Option<&str>,
        image_path: &Path,
    ) -> bool {
        let current_time = Utc::now().format("%d.%m.%Y la %H:%M:%S");
        let message = match (access_granted, recognized_person) {
            (true, Some(person)) => format!(
                "🚪 <b>ACCES PERMIS</b>\n\n\
                 ✅ Persoană recunoscută: <b>{person}</b>\n\
                 🕐 Ora: {current_time}\n\
                 🔓 Ușa s-a deschis automat"
            ),
            _ => format!(
                "🚨 <b>VIZITATOR NECUNOSCUT</b>\n\n\
                 👤 Persoană necunoscută la ușă\n\
                 🕐 Ora: {current_time}\n\
                 ⚠️ Acces refuzat - verificați cine este\n\n\
                 Răspundeți cu /open pentru a deschide ușa manual."
            ),
        };

        if image_path.exists() {
            self.send_photo(image_path, &message).await
        } else {
            self.send_message(&message).await
        }
    }

    async fn notify_text(&self, message: &str) -> bool {
        self.send_message(message).await
    }

    async fn notify_door_opened(&self, method: &str) -> bool {
        let current_time = Utc::now().format("%H:%M:%S");
        let message = match method {
            "manual" => format!(
                "🚪 <b>UȘA DESCHISĂ MANUAL</b>\n\n✋ Deschis din dashboard\n🕐 Ora: {current_time}"
            ),
            "telegram" => format!(
                "🚪 <b>UȘA DESCHISĂ</b>\n\n📱 Deschis prin comanda Telegram\n🕐 Ora: {current_time}"
            ),
            _ => format!("🚪 <b>UȘA DESCHISĂ</b>\n\n🔓 Deschis automat\n🕐 Ora: {current_time}"),
        };
        self.send_message(&message).await
    }
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<RawUpdate>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[async_trait]
impl CommandSource for TelegramClient {
    async fn fetch_updates(
        &self,
        offset: i64,
        wait_secs: u64,
    ) -> std::result::Result<Vec<CommandUpdate>, FetchError> {
        let config = self.config().await;
        if config.bot_token.is_empty() {
            return Err(FetchError::Failed("bot token not configured".to_string()));
        }

        let url = format!("{API_BASE}/bot{}/getUpdates", config.bot_token);
        let response = self
            .poll_client
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", wait_secs.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Failed(format!(
                "Telegram API status {}",
                response.status()
            )));
        }

        let body: UpdatesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;

        Ok(body
            .result
            .into_iter()
            .filter_map(|update| {
                let message = update.message?;
                Some(CommandUpdate {
                    update_id: update.update_id,
                    chat_id: message.chat.id.to_string(),
                    text: message.text.unwrap_or_default(),
                })
            })
            .collect())
    }
}
