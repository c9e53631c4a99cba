//! ImageStore - Uploaded Image Catalogue
//!
//! ## Responsibilities
//!
//! - Timestamped filename scheme for stored captures
//! - History listing parsed out of the upload directory
//! - Known-face gallery management
//!
//! Filenames are the only metadata carrier for history entries; anything
//! that does not parse is shown with a placeholder rather than hidden.

use crate::error::{Error, Result};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Prefix for device-pushed doorbell captures
pub const PREFIX_VISITOR: &str = "visitor_";
/// Prefix for operator-triggered captures
pub const PREFIX_MANUAL: &str = "manual_capture_";
/// Prefix for live-stream detections
pub const PREFIX_STREAM: &str = "stream_capture_";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const UNKNOWN_LABEL: &str = "Necunoscut";

/// `{prefix}{YYYYmmdd_HHMMSS}.jpg` for a capture taken now
pub fn timestamped_filename(prefix: &str) -> String {
    format!("{prefix}{}.jpg", Utc::now().format(TIMESTAMP_FORMAT))
}

/// Strip any path components so a client-supplied name cannot escape the
/// storage directory
pub fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string()
}

/// One entry in the capture history listing
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub image_url: String,
    pub capture_type: String,
    pub date: String,
    pub time: String,
}

/// One registered face in the recognition gallery
#[derive(Debug, Clone, Serialize)]
pub struct KnownFace {
    pub name: String,
    pub filename: String,
    pub image_url: String,
}

fn capture_type(filename: &str) -> Option<(&'static str, &str)> {
    if let Some(rest) = filename.strip_prefix(PREFIX_MANUAL) {
        Some(("manual", rest))
    } else if let Some(rest) = filename.strip_prefix(PREFIX_STREAM) {
        Some(("stream", rest))
    } else if let Some(rest) = filename.strip_prefix(PREFIX_VISITOR) {
        Some(("visitor", rest))
    } else {
        None
    }
}

/// Parse a capture filename into a history entry. Returns `None` for files
/// that are not captures (temp files, foreign uploads).
fn parse_history_entry(filename: &str) -> Option<HistoryEntry> {
    let (kind, rest) = capture_type(filename)?;
    let stamp = rest.strip_suffix(".jpg").unwrap_or(rest);
    let (date, time) = match NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) {
        Ok(ts) => (
            ts.format("%d.%m.%Y").to_string(),
            ts.format("%H:%M:%S").to_string(),
        ),
        Err(_) => (UNKNOWN_LABEL.to_string(), UNKNOWN_LABEL.to_string()),
    };
    Some(HistoryEntry {
        filename: filename.to_string(),
        image_url: format!("/uploads/{filename}"),
        capture_type: kind.to_string(),
        date,
        time,
    })
}

/// Directory-backed image catalogue
pub struct ImageStore {
    upload_dir: PathBuf,
    known_faces_dir: PathBuf,
}

impl ImageStore {
    /// Create the store, ensuring both directories exist
    pub fn new(upload_dir: PathBuf, known_faces_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&upload_dir)?;
        std::fs::create_dir_all(&known_faces_dir)?;
        Ok(Self {
            upload_dir,
            known_faces_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn known_faces_dir(&self) -> &Path {
        &self.known_faces_dir
    }

    /// Write capture bytes under the upload directory and return the full path
    pub async fn save_capture(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.upload_dir.join(sanitize_name(filename));
        fs::write(&path, data).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Capture saved");
        Ok(path)
    }

    /// Capture history, newest first
    pub async fn list_history(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.upload_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            if let Some(name) = item.file_name().to_str() {
                if let Some(entry) = parse_history_entry(name) {
                    entries.push(entry);
                }
            }
        }
        // Timestamped names sort chronologically; newest first
        entries.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(entries)
    }

    /// Registered faces, sorted by name
    pub async fn list_known_faces(&self) -> Result<Vec<KnownFace>> {
        let mut faces = Vec::new();
        let mut dir = fs::read_dir(&self.known_faces_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let Some(filename) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = Path::new(filename).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !filename.ends_with(".jpg") && !filename.ends_with(".jpeg") && !filename.ends_with(".png") {
                continue;
            }
            faces.push(KnownFace {
                name: stem.to_string(),
                filename: filename.to_string(),
                image_url: format!("/known_faces/{filename}"),
            });
        }
        faces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(faces)
    }

    /// Register a face image under the supplied person name
    pub async fn add_known_face(&self, name: &str, data: &[u8]) -> Result<KnownFace> {
        let name = sanitize_name(name.trim());
        if name.is_empty() {
            return Err(Error::Validation("Face name must not be empty".to_string()));
        }
        let filename = format!("{name}.jpg");
        let path = self.known_faces_dir.join(&filename);
        fs::write(&path, data).await?;
        tracing::info!(name = %name, "Known face registered");
        Ok(KnownFace {
            name,
            image_url: format!("/known_faces/{filename}"),
            filename,
        })
    }

    /// Remove a registered face by filename or by person name
    pub async fn remove_known_face(&self, name: &str) -> Result<()> {
        let name = sanitize_name(name);
        let direct = self.known_faces_dir.join(&name);
        if direct.is_file() {
            fs::remove_file(&direct).await?;
            tracing::info!(filename = %name, "Known face removed");
            return Ok(());
        }
        for ext in ["jpg", "jpeg", "png"] {
            let path = self.known_faces_dir.join(format!("{name}.{ext}"));
            if path.exists() {
                fs::remove_file(&path).await?;
                tracing::info!(name = %name, "Known face removed");
                return Ok(());
            }
        }
        Err(Error::NotFound(format!("No registered face named {name}")))
    }
}
