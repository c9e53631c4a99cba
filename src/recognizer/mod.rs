//! Recognizer Boundary
//!
//! The face-matching algorithm is an external collaborator: given an image
//! path it returns a match/no-match verdict. Failures are returned as
//! errors; the caller (the recognition pipeline) maps them to a denied/error
//! outcome and never propagates them further.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Recognizer output: matched or not, plus the identity when matched
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub matched: bool,
    pub person: Option<String>,
}

/// Face-match boundary
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Must not be assumed fast; callers run it off the request path
    async fn recognize(&self, image_path: &Path) -> Result<Verdict>;
}

/// HTTP adapter for a face-match service
pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    matched: bool,
    #[serde(default)]
    person: Option<String>,
}

impl HttpRecognizer {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, image_path: &Path) -> Result<Verdict> {
        let data = tokio::fs::read(image_path).await?;
        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("frame.jpg")
            .to_string();

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(format!("{}/match", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "Recognizer returned {}",
                response.status()
            )));
        }

        let body: MatchResponse = response.json().await?;
        Ok(Verdict {
            matched: body.matched,
            person: body.person,
        })
    }
}
