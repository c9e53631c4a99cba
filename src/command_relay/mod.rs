//! CommandRelay - Remote Command Listener
//!
//! ## Responsibilities
//!
//! - Long-poll the remote command source for operator commands
//! - Advance the update cursor monotonically, never re-fetching an update
//! - Authorize by sender identity, dispatch recognized commands
//! - Survive timeouts (expected) and network errors (fixed backoff) forever
//!
//! The loop is cooperative: `stop()` flips a flag that is checked at
//! iteration boundaries, not mid-poll. A credentials change restarts the
//! loop with a fresh epoch; a stale loop waking from its poll sees the
//! epoch mismatch and exits without touching the cursor.

use crate::config_store::BotConfig;
use crate::device_client::DoorCommandResult;
use crate::telegram::Notifier;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Server-side long-poll wait passed to the command source
pub const POLL_WAIT_SECS: u64 = 30;
/// Backoff after a non-timeout fetch failure
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Pause between stop and start on a credentials change
pub const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// One update fetched from the command source
#[derive(Debug, Clone)]
pub struct CommandUpdate {
    pub update_id: i64,
    pub chat_id: String,
    pub text: String,
}

/// Fetch failure classes with distinct recovery actions
#[derive(Debug)]
pub enum FetchError {
    /// Long-poll expired with nothing to report; retry immediately
    Timeout,
    /// Network or API failure; back off before retrying
    Failed(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Timeout => write!(f, "long-poll timeout"),
            FetchError::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// Remote command source boundary (Telegram getUpdates in production)
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Fetch updates strictly after `offset`, waiting server-side up to
    /// `wait_secs` for new ones
    async fn fetch_updates(
        &self,
        offset: i64,
        wait_secs: u64,
    ) -> std::result::Result<Vec<CommandUpdate>, FetchError>;
}

/// Injected door-control callback; the relay has no knowledge of the
/// actuator behind it
#[async_trait]
pub trait DoorController: Send + Sync {
    async fn open(&self) -> DoorCommandResult;
}

/// CommandRelay instance
pub struct CommandRelay {
    source: Arc<dyn CommandSource>,
    notifier: Arc<dyn Notifier>,
    door: Arc<dyn DoorController>,
    config: Arc<RwLock<BotConfig>>,
    cursor: Arc<AtomicI64>,
    running: Arc<RwLock<bool>>,
    epoch: Arc<AtomicU64>,
}

impl CommandRelay {
    pub fn new(
        source: Arc<dyn CommandSource>,
        notifier: Arc<dyn Notifier>,
        door: Arc<dyn DoorController>,
        config: Arc<RwLock<BotConfig>>,
    ) -> Self {
        Self {
            source,
            notifier,
            door,
            config,
            cursor: Arc::new(AtomicI64::new(0)),
            running: Arc::new(RwLock::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current cursor position (next update id to request)
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the listener loop. No-op when already running or when the bot
    /// is not configured.
    pub async fn start(&self) {
        {
            let config = self.config.read().await;
            if !config.is_configured() {
                tracing::info!("Bot not configured, command listener not started");
                return;
            }
        }
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Command listener already running");
                return;
            }
            *running = true;
        }

        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Starting command listener");

        let source = self.source.clone();
        let notifier = self.notifier.clone();
        let door = self.door.clone();
        let config = self.config.clone();
        let cursor = self.cursor.clone();
        let running = self.running.clone();
        let epoch = self.epoch.clone();

        tokio::spawn(async move {
            loop {
                {
                    if !*running.read().await || epoch.load(Ordering::SeqCst) != my_epoch {
                        break;
                    }
                }

                let cfg = config.read().await.clone();
                let offset = cursor.load(Ordering::SeqCst);

                match source.fetch_updates(offset, POLL_WAIT_SECS).await {
                    Ok(updates) => {
                        if epoch.load(Ordering::SeqCst) != my_epoch {
                            // Restarted mid-poll: leave the batch for the new
                            // loop (cursor untouched, so it is fetched again).
                            break;
                        }
                        for update in updates {
                            // Advance before processing: an already-advanced
                            // update is never fetched again, so a crash here
                            // loses exactly the in-flight update.
                            cursor.store(update.update_id + 1, Ordering::SeqCst);

                            if update.chat_id != cfg.chat_id {
                                tracing::debug!(
                                    chat_id = %update.chat_id,
                                    "Ignoring update from unauthorized chat"
                                );
                                continue;
                            }

                            let text = update.text.trim();
                            if !text.starts_with('/') {
                                continue;
                            }

                            tracing::info!(command = %text, "Processing command");
                            let reply = Self::handle_command(text, &cfg, door.as_ref()).await;
                            if !notifier.notify_text(&reply).await {
                                tracing::warn!("Failed to deliver command reply");
                            }
                        }
                    }
                    Err(FetchError::Timeout) => {
                        // Expected with long polling; retry immediately
                    }
                    Err(FetchError::Failed(reason)) => {
                        tracing::warn!(error = %reason, "Command poll failed, backing off");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
            tracing::info!("Command listener stopped");
        });
    }

    /// Request a cooperative stop; the loop exits at its next iteration
    /// boundary
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping command listener");
    }

    /// Apply a new configuration. A token or chat change restarts the loop
    /// (stop, pause, start) with the cursor preserved; an enabled-only
    /// change does not restart.
    pub async fn update_config(&self, new: BotConfig) {
        let restart_needed = {
            let mut config = self.config.write().await;
            let changed = config.bot_token != new.bot_token || config.chat_id != new.chat_id;
            *config = new;
            changed
        };

        if restart_needed && self.is_running().await {
            tracing::info!("Bot credentials changed, restarting command listener");
            self.stop().await;
            tokio::time::sleep(RESTART_PAUSE).await;
            self.start().await;
        }
    }

    /// Map a command to its textual reply. Case-insensitive exact match
    /// after trimming.
    async fn handle_command(text: &str, config: &BotConfig, door: &dyn DoorController) -> String {
        match text.trim().to_lowercase().as_str() {
            "/open" => {
                let result = door.open().await;
                if result.success {
                    "🚪 Comandă trimisă! Ușa se deschide...".to_string()
                } else {
                    format!("❌ Eroare la trimiterea comenzii: {}", result.message)
                }
            }
            "/status" => format!(
                "📊 <b>Status Smart Door</b>\n\n\
                 🔒 Sistem: {}\n\
                 📱 Telegram: {}\n\
                 🕐 {}",
                if config.enabled { "🟢 Activ" } else { "🔴 Inactiv" },
                if config.is_configured() { "🟢 Conectat" } else { "🔴 Neconfigurat" },
                Utc::now().format("%d.%m.%Y la %H:%M:%S"),
            ),
            "/help" => "🤖 <b>Comenzi disponibile:</b>\n\n\
                 /open - Deschide ușa de la distanță\n\
                 /status - Afișează status-ul sistemului\n\
                 /help - Afișează această listă\n\
                 /settings - Afișează setările curente"
                .to_string(),
            "/settings" => format!(
                "⚙️ <b>Setări curente:</b>\n\n\
                 📱 Notificări: {}\n\
                 🔑 Chat ID: <code>{}</code>\n\
                 🤖 Bot: {}",
                if config.enabled { "🟢 Activate" } else { "🔴 Dezactivate" },
                config.chat_id,
                if config.is_configured() { "🟢 Configurat" } else { "🔴 Neconfigurat" },
            ),
            _ => "❓ <b>Comandă necunoscută</b>\n\n\
                 Folosiți /help pentru a vedea comenzile disponibile."
                .to_string(),
        }
    }
}
