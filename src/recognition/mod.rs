//! RecognitionPipeline - Access Decision Orchestration
//!
//! ## Responsibilities
//!
//! - Run the recognizer on captured images and map failures to outcomes
//! - Record every attempt in the access and notification logs
//! - Drive the door actuator and outbound notifications
//! - Publish the matching dashboard event per acquisition method
//!
//! Collaborator failures never abort an attempt: a recognizer error becomes
//! a denied outcome with `error` status, and notification or door failures
//! are logged and swallowed. The attempt record is always written.

use crate::broadcast_hub::{BroadcastHub, HubEvent};
use crate::device_client::DoorActuator;
use crate::error::{Error, Result};
use crate::event_log::BoundedLog;
use crate::image_store::{self, ImageStore, PREFIX_MANUAL};
use crate::models::{
    AccessRecord, AccessStatus, AcquisitionMethod, Notification, RecognitionOutcome,
    LABEL_MANUAL_GRANT,
};
use crate::recognizer::Recognizer;
use crate::telegram::Notifier;
use crate::temp_store::TempFileStore;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

/// Which of the two logs the manual-grant override actually touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualGrantOutcome {
    pub record_updated: bool,
    pub notification_updated: bool,
}

/// RecognitionPipeline instance; shared across request handlers and the
/// background task runner.
pub struct RecognitionPipeline {
    recognizer: Arc<dyn Recognizer>,
    notifier: Arc<dyn Notifier>,
    actuator: Arc<dyn DoorActuator>,
    access_log: Arc<BoundedLog<AccessRecord>>,
    notification_log: Arc<BoundedLog<Notification>>,
    hub: Arc<BroadcastHub>,
    temp_store: Arc<TempFileStore>,
    image_store: Arc<ImageStore>,
}

impl RecognitionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        notifier: Arc<dyn Notifier>,
        actuator: Arc<dyn DoorActuator>,
        access_log: Arc<BoundedLog<AccessRecord>>,
        notification_log: Arc<BoundedLog<Notification>>,
        hub: Arc<BroadcastHub>,
        temp_store: Arc<TempFileStore>,
        image_store: Arc<ImageStore>,
    ) -> Self {
        Self {
            recognizer,
            notifier,
            actuator,
            access_log,
            notification_log,
            hub,
            temp_store,
            image_store,
        }
    }

    /// Run the recognizer on one image. Errors are mapped to a denied
    /// outcome with `error` status instead of propagating.
    pub async fn evaluate(&self, image_path: &Path) -> RecognitionOutcome {
        match self.recognizer.recognize(image_path).await {
            Ok(verdict) => RecognitionOutcome {
                access_granted: verdict.matched,
                status: if verdict.matched {
                    AccessStatus::Granted
                } else {
                    AccessStatus::Denied
                },
                recognized_person: verdict.person,
            },
            Err(e) => {
                tracing::error!(path = %image_path.display(), error = %e, "Recognition failed");
                RecognitionOutcome {
                    access_granted: false,
                    status: AccessStatus::Error,
                    recognized_person: None,
                }
            }
        }
    }

    /// Full access attempt for an image already stored under the upload
    /// directory: recognize, record, notify, actuate, broadcast.
    pub async fn run(
        &self,
        image_path: &Path,
        filename: &str,
        method: AcquisitionMethod,
    ) -> AccessRecord {
        let outcome = self.evaluate(image_path).await;
        let record = self.record_attempt(filename, &outcome, method).await;

        tracing::info!(
            filename = %filename,
            method = %record.method,
            granted = outcome.access_granted,
            person = outcome.recognized_person.as_deref().unwrap_or("-"),
            "Access attempt processed"
        );

        if !self
            .notifier
            .notify_visitor(
                outcome.access_granted,
                outcome.recognized_person.as_deref(),
                image_path,
            )
            .await
        {
            tracing::debug!(filename = %filename, "Visitor notification not delivered");
        }

        self.open_if_granted(&outcome).await;
        self.hub
            .publish(&Self::classify_event(method, &record, &outcome));
        record
    }

    /// Pull a frame from the device camera, recognize it, and keep it as a
    /// manual capture. The dashboard is informed over the hub; no chat
    /// notification is sent for operator-triggered captures.
    pub async fn manual_capture(&self) -> Result<AccessRecord> {
        let Some(data) = self.actuator.capture_image().await else {
            return Err(Error::Api("Camera capture failed".to_string()));
        };

        let temp = self.temp_store.acquire(".jpg")?;
        tokio::fs::write(temp.path(), &data).await?;

        let outcome = self.evaluate(temp.path()).await;

        let filename = image_store::timestamped_filename(PREFIX_MANUAL);
        let dest = self.image_store.upload_dir().join(&filename);
        temp.persist(&dest)?;

        let record = self
            .record_attempt(&filename, &outcome, AcquisitionMethod::Manual)
            .await;
        tracing::info!(filename = %filename, granted = outcome.access_granted, "Manual capture processed");

        self.open_if_granted(&outcome).await;
        self.hub
            .publish(&HubEvent::ManualCaptureWithRecognition(record.to_notification()));
        Ok(record)
    }

    /// Operator override: mark the newest entries for `filename` as granted
    /// in both logs and broadcast the override. Touches at most one entry
    /// per log; a stale filename (already evicted) updates nothing.
    pub async fn grant_manual(&self, filename: &str) -> ManualGrantOutcome {
        let granted_at = Utc::now();

        let record = self
            .access_log
            .update_first(
                |r| r.filename == filename,
                |r| {
                    r.access_granted = true;
                    r.status = AccessStatus::Granted;
                    r.recognition_result = LABEL_MANUAL_GRANT.to_string();
                    r.manual_grant_timestamp = Some(granted_at);
                    if !r.method.ends_with("_manual_override") {
                        r.method.push_str("_manual_override");
                    }
                },
            )
            .await;

        let notification = self
            .notification_log
            .update_first(
                |n| n.filename == filename,
                |n| {
                    n.access_granted = true;
                    n.status = AccessStatus::Granted;
                    n.recognition_result = LABEL_MANUAL_GRANT.to_string();
                },
            )
            .await;

        if let Some(record) = &record {
            tracing::info!(filename = %filename, "Manual access grant applied");
            self.hub
                .publish(&HubEvent::AccessGrantedManual(record.clone()));
        } else {
            tracing::warn!(filename = %filename, "Manual grant target not found in access log");
        }

        ManualGrantOutcome {
            record_updated: record.is_some(),
            notification_updated: notification.is_some(),
        }
    }

    async fn record_attempt(
        &self,
        filename: &str,
        outcome: &RecognitionOutcome,
        method: AcquisitionMethod,
    ) -> AccessRecord {
        let record = AccessRecord::new(filename, outcome, method);
        self.notification_log
            .insert_front(record.to_notification())
            .await;
        self.access_log.insert_front(record.clone()).await;
        record
    }

    async fn open_if_granted(&self, outcome: &RecognitionOutcome) {
        if !outcome.access_granted {
            return;
        }
        let result = self.actuator.open_door().await;
        if !result.success {
            tracing::warn!(message = %result.message, "Door open after grant failed");
        }
    }

    fn classify_event(
        method: AcquisitionMethod,
        record: &AccessRecord,
        outcome: &RecognitionOutcome,
    ) -> HubEvent {
        let notification = record.to_notification();
        match method {
            AcquisitionMethod::Automatic => HubEvent::NewVisitor(notification),
            AcquisitionMethod::StreamDetection if outcome.access_granted => {
                HubEvent::StreamFaceRecognized(notification)
            }
            AcquisitionMethod::StreamDetection => HubEvent::StreamFaceDenied(notification),
            AcquisitionMethod::Manual => HubEvent::FaceRecognitionComplete(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_client::DoorCommandResult;
    use crate::event_log::{ACCESS_LOG_CAPACITY, NOTIFICATION_LOG_CAPACITY};
    use crate::recognizer::Verdict;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockRecognizer {
        verdict: Mutex<Option<Verdict>>,
    }

    impl MockRecognizer {
        fn matching(person: &str) -> Arc<Self> {
            Arc::new(Self {
                verdict: Mutex::new(Some(Verdict {
                    matched: true,
                    person: Some(person.to_string()),
                })),
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                verdict: Mutex::new(Some(Verdict::default())),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                verdict: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Recognizer for MockRecognizer {
        async fn recognize(&self, _image_path: &Path) -> Result<Verdict> {
            match self.verdict.lock().unwrap().clone() {
                Some(verdict) => Ok(verdict),
                None => Err(Error::Api("recognizer offline".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        visitor_calls: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify_visitor(
            &self,
            _access_granted: bool,
            _recognized_person: Option<&str>,
            _image_path: &Path,
        ) -> bool {
            self.visitor_calls.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn notify_text(&self, _message: &str) -> bool {
            true
        }

        async fn notify_door_opened(&self, _method: &str) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MockActuator {
        opens: AtomicUsize,
        capture: Option<Vec<u8>>,
    }

    #[async_trait]
    impl DoorActuator for MockActuator {
        async fn open_door(&self) -> DoorCommandResult {
            self.opens.fetch_add(1, Ordering::SeqCst);
            DoorCommandResult {
                success: true,
                message: "ok".to_string(),
            }
        }

        async fn capture_image(&self) -> Option<Vec<u8>> {
            self.capture.clone()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: RecognitionPipeline,
        notifier: Arc<MockNotifier>,
        actuator: Arc<MockActuator>,
        access_log: Arc<BoundedLog<AccessRecord>>,
        notification_log: Arc<BoundedLog<Notification>>,
        hub: Arc<BroadcastHub>,
    }

    fn fixture_with(recognizer: Arc<MockRecognizer>, actuator: Arc<MockActuator>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let notifier = Arc::new(MockNotifier::default());
        let access_log = Arc::new(BoundedLog::new(ACCESS_LOG_CAPACITY));
        let notification_log = Arc::new(BoundedLog::new(NOTIFICATION_LOG_CAPACITY));
        let hub = Arc::new(BroadcastHub::new());
        let temp_store =
            Arc::new(TempFileStore::new(dir.path().join("temp")).expect("temp store"));
        let image_store = Arc::new(
            ImageStore::new(dir.path().join("uploads"), dir.path().join("faces"))
                .expect("image store"),
        );
        let pipeline = RecognitionPipeline::new(
            recognizer,
            notifier.clone(),
            actuator.clone(),
            access_log.clone(),
            notification_log.clone(),
            hub.clone(),
            temp_store,
            image_store,
        );
        Fixture {
            _dir: dir,
            pipeline,
            notifier,
            actuator,
            access_log,
            notification_log,
            hub,
        }
    }

    fn fixture(recognizer: Arc<MockRecognizer>) -> Fixture {
        fixture_with(recognizer, Arc::new(MockActuator::default()))
    }

    #[tokio::test]
    async fn test_granted_upload_opens_door_and_broadcasts_new_visitor() {
        let fx = fixture(MockRecognizer::matching("alice"));
        let mut sub = fx.hub.subscribe();

        let record = fx
            .pipeline
            .run(Path::new("missing.jpg"), "visitor_1.jpg", AcquisitionMethod::Automatic)
            .await;

        assert!(record.access_granted);
        assert_eq!(record.recognized_person.as_deref(), Some("alice"));
        assert_eq!(fx.actuator.opens.load(Ordering::SeqCst), 1);
        assert_eq!(fx.notifier.visitor_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.access_log.len().await, 1);
        assert_eq!(fx.notification_log.len().await, 1);

        let payload = sub.try_next().expect("hub event");
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["type"], "new_visitor");
        assert_eq!(value["data"]["recognized_person"], "alice");
    }

    #[tokio::test]
    async fn test_recognizer_failure_records_error_and_keeps_door_shut() {
        let fx = fixture(MockRecognizer::failing());
        let record = fx
            .pipeline
            .run(Path::new("missing.jpg"), "visitor_2.jpg", AcquisitionMethod::Automatic)
            .await;

        assert!(!record.access_granted);
        assert_eq!(record.status, AccessStatus::Error);
        assert_eq!(fx.actuator.opens.load(Ordering::SeqCst), 0);
        // The attempt is still recorded and the visitor still notified
        assert_eq!(fx.access_log.len().await, 1);
        assert_eq!(fx.notifier.visitor_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_detection_events_split_by_verdict() {
        let fx = fixture(MockRecognizer::matching("alice"));
        let mut sub = fx.hub.subscribe();
        fx.pipeline
            .run(
                Path::new("missing.jpg"),
                "stream_capture_1.jpg",
                AcquisitionMethod::StreamDetection,
            )
            .await;
        let value: serde_json::Value =
            serde_json::from_str(&sub.try_next().expect("event")).expect("json");
        assert_eq!(value["type"], "stream_face_recognized");

        let fx = fixture(MockRecognizer::denying());
        let mut sub = fx.hub.subscribe();
        fx.pipeline
            .run(
                Path::new("missing.jpg"),
                "stream_capture_2.jpg",
                AcquisitionMethod::StreamDetection,
            )
            .await;
        let value: serde_json::Value =
            serde_json::from_str(&sub.try_next().expect("event")).expect("json");
        assert_eq!(value["type"], "stream_face_denied");
    }

    #[tokio::test]
    async fn test_manual_capture_persists_image_and_skips_chat_notification() {
        let actuator = Arc::new(MockActuator {
            opens: AtomicUsize::new(0),
            capture: Some(b"frame".to_vec()),
        });
        let fx = fixture_with(MockRecognizer::denying(), actuator);
        let mut sub = fx.hub.subscribe();

        let record = fx.pipeline.manual_capture().await.expect("capture");
        assert!(record.filename.starts_with(PREFIX_MANUAL));
        assert_eq!(fx.notifier.visitor_calls.load(Ordering::SeqCst), 0);

        let value: serde_json::Value =
            serde_json::from_str(&sub.try_next().expect("event")).expect("json");
        assert_eq!(value["type"], "manual_capture_with_recognition");
    }

    #[tokio::test]
    async fn test_manual_capture_without_camera_is_an_error() {
        let fx = fixture(MockRecognizer::denying());
        assert!(fx.pipeline.manual_capture().await.is_err());
        assert!(fx.access_log.is_empty().await);
    }

    #[tokio::test]
    async fn test_grant_manual_overrides_both_logs_and_broadcasts() {
        let fx = fixture(MockRecognizer::denying());
        fx.pipeline
            .run(Path::new("missing.jpg"), "visitor_9.jpg", AcquisitionMethod::Automatic)
            .await;
        let mut sub = fx.hub.subscribe();

        let outcome = fx.pipeline.grant_manual("visitor_9.jpg").await;
        assert!(outcome.record_updated);
        assert!(outcome.notification_updated);

        let record = &fx.access_log.snapshot().await[0];
        assert!(record.access_granted);
        assert_eq!(record.status, AccessStatus::Granted);
        assert_eq!(record.recognition_result, LABEL_MANUAL_GRANT);
        assert_eq!(record.method, "automatic_manual_override");
        assert!(record.manual_grant_timestamp.is_some());

        let notification = &fx.notification_log.snapshot().await[0];
        assert!(notification.access_granted);
        // The notification keeps its original method tag
        assert_eq!(notification.method, "automatic");

        let value: serde_json::Value =
            serde_json::from_str(&sub.try_next().expect("event")).expect("json");
        assert_eq!(value["type"], "access_granted_manual");
        assert_eq!(value["data"]["filename"], "visitor_9.jpg");
    }

    #[tokio::test]
    async fn test_grant_manual_on_evicted_filename_updates_nothing() {
        let fx = fixture(MockRecognizer::denying());
        let mut sub = fx.hub.subscribe();
        let outcome = fx.pipeline.grant_manual("never_logged.jpg").await;
        assert!(!outcome.record_updated);
        assert!(!outcome.notification_updated);
        assert!(sub.try_next().is_none());
    }
}
