//! Smart-Door Controller Dashboard
//!
//! ## Architecture (7 Components)
//!
//! 1. TempFileStore - Scoped temporary file tracking with shutdown sweep
//! 2. BoundedLog - Fixed-capacity, newest-first access/notification logs
//! 3. TaskRunner - Fixed worker pool for background recognition work
//! 4. RecognitionPipeline - Recognize, record, notify, actuate, publish
//! 5. BroadcastHub - Pub/sub fan-out to live dashboard streams (SSE)
//! 6. CommandRelay - Long-poll Telegram command listener with backoff
//! 7. Service proxies - Recognizer / door device / Telegram adapters
//!
//! ## Design Principles
//!
//! - Shared state lives behind owned, lock-guarded containers
//! - External calls happen strictly outside lock scopes
//! - Background failures become log lines, never crashed workers

pub mod broadcast_hub;
pub mod command_relay;
pub mod config_store;
pub mod device_client;
pub mod error;
pub mod event_log;
pub mod image_store;
pub mod models;
pub mod recognition;
pub mod recognizer;
pub mod state;
pub mod task_runner;
pub mod telegram;
pub mod temp_store;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
