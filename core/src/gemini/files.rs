//! Gemini File API: upload media, then poll until it can be referenced.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{CrewError, Result};

const POLL_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    #[serde(other)]
    StateUnspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFile {
    /// `files/{id}`
    pub name: String,
    #[serde(default)]
    pub uri: String,
    pub state: FileState,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<String>,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: GeminiFile,
}

#[derive(Debug, Clone)]
pub struct FileApi {
    client: Client,
    api_key: String,
    base_url: String,
    initial_delay: Duration,
}

impl FileApi {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
            initial_delay: Duration::from_secs(1),
        }
    }

    /// First polling delay; doubles up to 10 s.
    pub fn with_poll_interval(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str, mime_type: &str) -> Result<GeminiFile> {
        debug!(file_name, size = bytes.len(), mime_type, "uploading file to Gemini");

        let metadata = json!({ "file": { "displayName": file_name } });
        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(|e| CrewError::Provider(format!("invalid metadata part: {e}")))?,
            )
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(file_name.to_string())
                    .mime_str(mime_type)
                    .map_err(|e| CrewError::InvalidUpload(format!("invalid MIME type '{mime_type}': {e}")))?,
            );

        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "multipart")
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status, &body, "file upload"));
        }
        let envelope: FileEnvelope = response.json().await?;
        debug!(name = %envelope.file.name, state = ?envelope.file.state, "file uploaded");
        Ok(envelope.file)
    }

    pub async fn get(&self, name: &str) -> Result<GeminiFile> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status, &body, &format!("retrieve {name}")));
        }
        Ok(response.json().await?)
    }

    /// Polls until the file leaves `PROCESSING`. `FAILED` and timeouts are errors.
    pub async fn wait_until_active(&self, file: GeminiFile) -> Result<GeminiFile> {
        let started = Instant::now();
        let mut delay = self.initial_delay;
        let mut current = file;

        loop {
            match current.state {
                FileState::Active => {
                    debug!(name = %current.name, elapsed = ?started.elapsed(), "file is active");
                    return Ok(current);
                }
                FileState::Failed => {
                    return Err(CrewError::FileProcessing(format!("{} failed processing", current.name)));
                }
                FileState::Processing | FileState::StateUnspecified => {
                    if started.elapsed() > POLL_TIMEOUT {
                        return Err(CrewError::FileProcessing(format!(
                            "{} still processing after {}s",
                            current.name,
                            POLL_TIMEOUT.as_secs()
                        )));
                    }
                    debug!(name = %current.name, ?delay, "file still processing");
                    sleep(delay).await;
                    delay = (delay * 2).min(POLL_MAX_DELAY);
                    current = self.get(&current.name).await?;
                }
            }
        }
    }
}

pub(crate) fn http_error(status: StatusCode, body: &str, operation: &str) -> CrewError {
    match status.as_u16() {
        401 | 403 => CrewError::Provider(format!("authentication failed for {operation}: {body}")),
        413 => CrewError::InvalidUpload(format!("file too large for {operation}: {body}")),
        429 => CrewError::Provider(format!("rate limit exceeded for {operation}: {body}")),
        _ => CrewError::Provider(format!("{operation} failed ({status}): {body}")),
    }
}
