//! API Routes

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

use crate::config_store::BotConfig;
use crate::device_client::DoorActuator;
use crate::error::{Error, Result};
use crate::image_store::{self, PREFIX_STREAM, PREFIX_VISITOR};
use crate::models::AcquisitionMethod;
use crate::state::AppState;
use crate::telegram::Notifier;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Recognition pipeline entry points
        .route("/upload", post(upload_capture))
        .route("/api/detect-face-stream", post(detect_face_stream))
        .route("/take_photo", post(take_photo))
        // Live dashboard stream
        .route("/events", get(event_stream))
        // Logs
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/clear", post(clear_notifications))
        .route("/api/access-history", get(list_access_history))
        .route("/api/access/grant/:filename", post(grant_access))
        // Door & camera device
        .route("/api/door/open", post(open_door))
        .route("/api/camera/status", get(camera_status))
        .route("/api/settings/camera-ip", post(update_camera_ip))
        // Stored captures & face gallery
        .route("/api/history", get(list_history))
        .route("/api/faces", get(list_faces))
        .route("/api/faces/add", post(add_face_from_source))
        .route("/api/faces/upload", post(add_face_upload))
        .route("/api/faces/:filename", delete(remove_face))
        // Telegram settings
        .route("/api/settings/telegram", get(get_telegram_settings))
        .route("/api/settings/telegram", put(update_telegram_settings))
        .route("/api/settings/telegram/test", post(test_telegram))
        .with_state(state)
}

/// Pull the first field matching one of `names` out of a multipart body
async fn multipart_bytes(
    multipart: &mut Multipart,
    names: &[&str],
) -> Result<Option<Vec<u8>>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if names.contains(&name.as_str()) {
            let data = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("Failed to read upload: {e}")))?;
            return Ok(Some(data.to_vec()));
        }
    }
    Ok(None)
}

/// Store an incoming capture and queue the recognition attempt
async fn queue_recognition(
    state: &AppState,
    data: &[u8],
    prefix: &str,
    method: AcquisitionMethod,
) -> Result<String> {
    if data.is_empty() {
        return Err(Error::Validation("Uploaded image is empty".to_string()));
    }

    let filename = image_store::timestamped_filename(prefix);
    let path = state.image_store.save_capture(&filename, data).await?;

    let pipeline = state.pipeline.clone();
    let task_filename = filename.clone();
    state.task_runner.submit(async move {
        pipeline.run(&path, &task_filename, method).await;
        Ok(())
    });

    Ok(filename)
}

/// Doorbell capture pushed by the device as a raw JPEG body. The response
/// goes back before recognition runs, so access_granted is always false
/// here; the device learns nothing more, the dashboard gets the verdict
/// over the event stream.
async fn upload_capture(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match queue_recognition(&state, &body, PREFIX_VISITOR, AcquisitionMethod::Automatic).await {
        Ok(filename) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "filename": filename,
                "access_granted": false,
                "status": "processing"
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Frame pushed from a live stream face detector
async fn detect_face_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let data = match multipart_bytes(&mut multipart, &["image", "file"]).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            return Error::Validation("No image field in request".to_string()).into_response()
        }
        Err(e) => return e.into_response(),
    };

    match queue_recognition(
        &state,
        &data,
        PREFIX_STREAM,
        AcquisitionMethod::StreamDetection,
    )
    .await
    {
        Ok(filename) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "filename": filename,
                "status": "processing"
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Operator-triggered capture from the device camera
async fn take_photo(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = state.pipeline.clone();
    state.task_runner.submit(async move {
        pipeline.manual_capture().await?;
        Ok(())
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "status": "processing"
        })),
    )
}

/// Server-sent events stream for the dashboard. Emits a connected event,
/// then one pending hub event or a ping per keep-alive tick.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();

    let connected = stream::once(async {
        Ok(Event::default().data(crate::broadcast_hub::Subscription::connected_payload()))
    });
    let updates = stream::unfold(subscription, |mut subscription| async move {
        let payload = subscription.next_payload().await;
        Some((Ok(Event::default().data(payload)), subscription))
    });

    Sse::new(connected.chain(updates))
}

async fn list_notifications(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.notification_log.snapshot().await)
}

async fn clear_notifications(State(state): State<AppState>) -> impl IntoResponse {
    state.notification_log.clear().await;
    tracing::info!("Notification log cleared");
    Json(json!({"success": true}))
}

async fn list_access_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.access_log.snapshot().await)
}

/// Manual access grant for a previously denied attempt. Always reports the
/// bookkeeping it performed; an evicted or unknown filename simply updates
/// neither log, and callers must check both flags.
async fn grant_access(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    let filename = image_store::sanitize_name(&filename);
    let outcome = state.pipeline.grant_manual(&filename).await;
    Json(json!({
        "success": true,
        "record_updated": outcome.record_updated,
        "notification_updated": outcome.notification_updated
    }))
}

/// Dashboard-initiated door open
async fn open_door(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.esp32.open_door().await;
    if result.success && !state.telegram.notify_door_opened("manual").await {
        tracing::debug!("Door-open notification not delivered");
    }

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(result))
}

async fn camera_status(State(state): State<AppState>) -> impl IntoResponse {
    let online = state.esp32.is_online().await;
    Json(json!({
        "online": online,
        "device_ip": state.esp32.device_ip().await
    }))
}

#[derive(Debug, Deserialize)]
struct CameraIpRequest {
    ip: String,
}

async fn update_camera_ip(
    State(state): State<AppState>,
    Json(req): Json<CameraIpRequest>,
) -> impl IntoResponse {
    let ip = req.ip.trim();
    if ip.is_empty() {
        return Error::Validation("ip must not be empty".to_string()).into_response();
    }
    state.esp32.set_device_ip(ip.to_string()).await;
    Json(json!({"success": true, "device_ip": ip})).into_response()
}

async fn list_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.image_store.list_history().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_faces(State(state): State<AppState>) -> impl IntoResponse {
    match state.image_store.list_known_faces().await {
        Ok(faces) => Json(faces).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AddFaceRequest {
    name: String,
    source: String,
    #[serde(default)]
    filename: Option<String>,
}

/// Register a face from a fresh device capture or from an image already in
/// the capture history
async fn add_face_from_source(
    State(state): State<AppState>,
    Json(req): Json<AddFaceRequest>,
) -> impl IntoResponse {
    let data = match req.source.as_str() {
        "capture" => match state.esp32.capture_image().await {
            Some(data) => data,
            None => return Error::Api("Camera capture failed".to_string()).into_response(),
        },
        "history" => {
            let Some(filename) = req.filename.as_deref() else {
                return Error::Validation("Missing filename for history source".to_string())
                    .into_response();
            };
            let path = state
                .image_store
                .upload_dir()
                .join(image_store::sanitize_name(filename));
            match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(_) => {
                    return Error::NotFound(format!("No stored capture named {filename}"))
                        .into_response()
                }
            }
        }
        other => {
            return Error::Validation(format!("Unknown source: {other}")).into_response()
        }
    };

    match state.image_store.add_known_face(&req.name, &data).await {
        Ok(face) => (StatusCode::CREATED, Json(face)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Register a face from a direct upload: multipart with a `name` text field
/// and an `image` file
async fn add_face_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut name: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Error::Validation(format!("Malformed multipart body: {e}"))
                    .into_response()
            }
        };
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => match field.text().await {
                Ok(text) => name = Some(text),
                Err(e) => {
                    return Error::Validation(format!("Failed to read name: {e}"))
                        .into_response()
                }
            },
            Some("image") | Some("file") => match field.bytes().await {
                Ok(bytes) => data = Some(bytes.to_vec()),
                Err(e) => {
                    return Error::Validation(format!("Failed to read image: {e}"))
                        .into_response()
                }
            },
            _ => {}
        }
    }

    let Some(name) = name else {
        return Error::Validation("Missing name field".to_string()).into_response();
    };
    let Some(data) = data else {
        return Error::Validation("Missing image field".to_string()).into_response();
    };

    match state.image_store.add_known_face(&name, &data).await {
        Ok(face) => (StatusCode::CREATED, Json(face)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn remove_face(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    match state.image_store.remove_known_face(&filename).await {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_telegram_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telegram.status().await)
}

#[derive(Debug, Deserialize)]
struct TelegramSettingsRequest {
    #[serde(default)]
    bot_token: String,
    #[serde(default)]
    chat_id: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Persist new bot settings and hand them to the command relay, which
/// restarts its listener when the credentials changed
async fn update_telegram_settings(
    State(state): State<AppState>,
    Json(req): Json<TelegramSettingsRequest>,
) -> impl IntoResponse {
    let config = BotConfig {
        bot_token: req.bot_token.trim().to_string(),
        chat_id: req.chat_id.trim().to_string(),
        enabled: req.enabled,
    };

    if let Err(e) = state.config_store.save(&config).await {
        return e.into_response();
    }

    let configured = config.is_configured();
    state.relay.update_config(config).await;
    if configured && !state.relay.is_running().await {
        state.relay.start().await;
    }

    Json(state.telegram.status().await).into_response()
}

async fn test_telegram(State(state): State<AppState>) -> impl IntoResponse {
    let delivered = state.telegram.send_test_notification().await;
    let status = if delivered {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (
        status,
        Json(json!({
            "success": delivered,
            "message": if delivered {
                "Test notification sent"
            } else {
                "Delivery failed - check bot settings"
            }
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast_hub::{BroadcastHub, HubDoorRelay};
    use crate::command_relay::{CommandRelay, CommandSource, DoorController};
    use crate::config_store::ConfigStore;
    use crate::device_client::Esp32Client;
    use crate::event_log::{BoundedLog, ACCESS_LOG_CAPACITY, NOTIFICATION_LOG_CAPACITY};
    use crate::image_store::ImageStore;
    use crate::recognition::RecognitionPipeline;
    use crate::recognizer::{HttpRecognizer, Recognizer};
    use crate::task_runner::{TaskRunner, DEFAULT_WORKERS};
    use crate::telegram::TelegramClient;
    use crate::temp_store::TempFileStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    // Device endpoints point at a closed local port so background pipeline
    // runs fail fast without reaching the network.
    fn test_state(dir: &std::path::Path) -> AppState {
        let access_log = Arc::new(BoundedLog::new(ACCESS_LOG_CAPACITY));
        let notification_log = Arc::new(BoundedLog::new(NOTIFICATION_LOG_CAPACITY));
        let hub = Arc::new(BroadcastHub::new());
        let temp_store = Arc::new(TempFileStore::new(dir.join("temp")).expect("temp store"));
        let image_store = Arc::new(
            ImageStore::new(dir.join("uploads"), dir.join("faces")).expect("image store"),
        );
        let config_store = Arc::new(ConfigStore::new(dir.join("telegram_config.json")));
        let bot_config = Arc::new(RwLock::new(BotConfig::default()));
        let telegram = Arc::new(TelegramClient::new(bot_config.clone()));
        let esp32 = Arc::new(Esp32Client::new("127.0.0.1:9".to_string()));
        let recognizer = Arc::new(HttpRecognizer::new("http://127.0.0.1:9".to_string()));
        let task_runner = Arc::new(TaskRunner::new(DEFAULT_WORKERS));
        let pipeline = Arc::new(RecognitionPipeline::new(
            recognizer as Arc<dyn Recognizer>,
            telegram.clone() as Arc<dyn Notifier>,
            esp32.clone() as Arc<dyn DoorActuator>,
            access_log.clone(),
            notification_log.clone(),
            hub.clone(),
            temp_store.clone(),
            image_store.clone(),
        ));
        let door_relay = Arc::new(HubDoorRelay::new(hub.clone()));
        let relay = Arc::new(CommandRelay::new(
            telegram.clone() as Arc<dyn CommandSource>,
            telegram.clone() as Arc<dyn Notifier>,
            door_relay as Arc<dyn DoorController>,
            bot_config,
        ));
        AppState {
            access_log,
            notification_log,
            hub,
            temp_store,
            image_store,
            task_runner,
            pipeline,
            esp32,
            telegram,
            relay,
            config_store,
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_raw_body_upload_is_accepted_and_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let router = create_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header("content-type", "image/jpeg")
                    .body(Body::from(vec![0xFF, 0xD8, 0xFF, 0xE0]))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["access_granted"], false);
        let filename = body["filename"].as_str().expect("filename");
        assert!(filename.starts_with(PREFIX_VISITOR));
        assert!(dir.path().join("uploads").join(filename).exists());
    }

    #[tokio::test]
    async fn test_empty_upload_body_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router = create_router(test_state(dir.path()));

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header("content-type", "image/jpeg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_grant_on_unknown_filename_reports_both_flags_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router = create_router(test_state(dir.path()));

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/access/grant/ghost.jpg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["record_updated"], false);
        assert_eq!(body["notification_updated"], false);
    }

    #[tokio::test]
    async fn test_add_face_from_history_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        state
            .image_store
            .save_capture("visitor_20260101_000000.jpg", b"face bytes")
            .await
            .expect("save");
        let router = create_router(state);

        let request = json!({
            "name": "alice",
            "source": "history",
            "filename": "visitor_20260101_000000.jpg"
        });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/faces/add")
                    .header("content-type", "application/json")
                    .body(Body::from(request.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["name"], "alice");
        assert!(dir.path().join("faces").join("alice.jpg").exists());

        // Unknown history filename is a 404, unknown source a 400
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/faces/add")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"name": "bob", "source": "history", "filename": "nope.jpg"})
                            .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/faces/add")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"name": "bob", "source": "webcam"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_remove_face_accepts_filename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        state
            .image_store
            .add_known_face("alice", b"img")
            .await
            .expect("add");
        let router = create_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/faces/alice.jpg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!dir.path().join("faces").join("alice.jpg").exists());
    }

    #[tokio::test]
    async fn test_camera_ip_update_uses_ip_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state(dir.path());
        let router = create_router(state.clone());

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/settings/camera-ip")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"ip": "10.0.0.7"}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.esp32.device_ip().await, "10.0.0.7");
    }
}
