//! Shared domain types
//!
//! AccessRecord is the durable (in-memory, bounded) log entry for one access
//! attempt; Notification is its dashboard-facing projection. The two are
//! created together and only ever diverge through the manual-grant override,
//! which updates both under their respective log locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result label shown when the visitor was recognized
pub const LABEL_RECOGNIZED: &str = "Persoană recunoscută";
/// Result label shown when the visitor was not recognized
pub const LABEL_UNRECOGNIZED: &str = "Persoană necunoscută";
/// Result label applied by the manual-grant override
pub const LABEL_MANUAL_GRANT: &str = "Acces permis manual";

/// Outcome status of one access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Granted,
    Denied,
    Error,
}

/// How the image that triggered an access attempt was acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMethod {
    /// Device pushed the image (doorbell upload)
    Automatic,
    /// Operator triggered a capture from the dashboard
    Manual,
    /// Face spotted in the live stream
    StreamDetection,
}

impl AcquisitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMethod::Automatic => "automatic",
            AcquisitionMethod::Manual => "manual",
            AcquisitionMethod::StreamDetection => "stream_detection",
        }
    }
}

/// What the pipeline concluded for one image, after mapping recognizer
/// failures to a denied/error verdict
#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub access_granted: bool,
    pub status: AccessStatus,
    pub recognized_person: Option<String>,
}

/// One recorded access attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub image_url: String,
    pub access_granted: bool,
    pub status: AccessStatus,
    /// Free-form acquisition tag; `_manual_override` is appended on override
    pub method: String,
    pub recognized_person: Option<String>,
    pub recognition_result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_grant_timestamp: Option<DateTime<Utc>>,
}

impl AccessRecord {
    /// Build a record for a fresh access attempt. The notification projection
    /// is derived separately via [`AccessRecord::to_notification`].
    pub fn new(filename: &str, outcome: &RecognitionOutcome, method: AcquisitionMethod) -> Self {
        let label = if outcome.access_granted {
            LABEL_RECOGNIZED
        } else {
            LABEL_UNRECOGNIZED
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            filename: filename.to_string(),
            image_url: format!("/uploads/{filename}"),
            access_granted: outcome.access_granted,
            status: outcome.status,
            method: method.as_str().to_string(),
            recognized_person: outcome.recognized_person.clone(),
            recognition_result: label.to_string(),
            manual_grant_timestamp: None,
        }
    }

    /// Project this record into its dashboard notification. Own id, shared
    /// timestamp; no back-reference.
    pub fn to_notification(&self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            timestamp: self.timestamp,
            filename: self.filename.clone(),
            image_url: self.image_url.clone(),
            access_granted: self.access_granted,
            status: self.status,
            recognized_person: self.recognized_person.clone(),
            recognition_result: self.recognition_result.clone(),
            method: self.method.clone(),
        }
    }
}

/// Dashboard-facing projection of an access record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub image_url: String,
    pub access_granted: bool,
    pub status: AccessStatus,
    pub recognized_person: Option<String>,
    pub recognition_result: String,
    pub method: String,
}
