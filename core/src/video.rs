use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{CrewError, Result};
use crate::gemini::{FileApi, Gemini};

const MAX_VIDEO_BYTES: usize = 200 * 1024 * 1024;

/// MIME type for a supported video file name.
pub fn video_mime(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp4" => "video/mp4",
        "mpeg" | "mpg" => "video/mpeg",
        "mov" => "video/mov",
        "avi" => "video/avi",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        "wmv" => "video/wmv",
        "3gp" | "3gpp" => "video/3gpp",
        _ => return None,
    };
    Some(mime)
}

#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl VideoUpload {
    /// Rejects anything we would not send to the File API.
    pub fn validate(&self) -> Result<&'static str> {
        let mime = video_mime(&self.file_name).ok_or_else(|| {
            CrewError::InvalidUpload(format!("'{}' is not a supported video format", self.file_name))
        })?;
        if self.bytes.is_empty() {
            return Err(CrewError::InvalidUpload(format!("'{}' is empty", self.file_name)));
        }
        if self.bytes.len() > MAX_VIDEO_BYTES {
            return Err(CrewError::InvalidUpload(format!(
                "'{}' exceeds {} MB",
                self.file_name,
                MAX_VIDEO_BYTES / (1024 * 1024)
            )));
        }
        Ok(mime)
    }
}

/// Upload a video, wait for Gemini to finish processing it, then ask about it.
pub struct VideoAssistant {
    gemini: Arc<Gemini>,
    files: FileApi,
}

impl VideoAssistant {
    pub fn new(gemini: Arc<Gemini>) -> Self {
        let files = gemini.files();
        Self { gemini, files }
    }

    pub fn with_files(gemini: Arc<Gemini>, files: FileApi) -> Self {
        Self { gemini, files }
    }

    pub async fn ask(&self, upload: VideoUpload, prompt: &str) -> Result<String> {
        let mime = upload.validate()?;
        if prompt.trim().is_empty() {
            return Err(CrewError::InvalidInput("prompt is empty".into()));
        }

        let file = self.files.upload(upload.bytes, &upload.file_name, mime).await?;
        info!(name = %file.name, "video uploaded, waiting for processing");
        let file = self.files.wait_until_active(file).await?;
        self.gemini.ask_about_file(&file, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeminiSettings;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn mime_detection() {
        assert_eq!(video_mime("clip.MP4"), Some("video/mp4"));
        assert_eq!(video_mime("clip.webm"), Some("video/webm"));
        assert_eq!(video_mime("notes.txt"), None);
        assert_eq!(video_mime("noextension"), None);
    }

    #[test]
    fn uploads_are_validated() {
        let empty = VideoUpload {
            file_name: "clip.mp4".into(),
            bytes: Vec::new(),
        };
        assert!(matches!(empty.validate(), Err(CrewError::InvalidUpload(_))));

        let wrong = VideoUpload {
            file_name: "image.png".into(),
            bytes: vec![1],
        };
        assert!(matches!(wrong.validate(), Err(CrewError::InvalidUpload(_))));
    }

    #[tokio::test]
    async fn rejected_upload_never_reaches_the_api() {
        let server = mockito::Server::new_async().await;
        let settings = GeminiSettings {
            api_key: "g-key".into(),
            model: "gemini-1.5-pro".into(),
        };
        let assistant = VideoAssistant::new(Arc::new(Gemini::with_base_url(&settings, &server.url())));
        let err = assistant
            .ask(
                VideoUpload {
                    file_name: "doc.pdf".into(),
                    bytes: vec![1, 2],
                },
                "what is this?",
            )
            .await
            .unwrap_err();
        assert!(err.is_user_error());
    }

    #[tokio::test]
    async fn full_flow_upload_poll_ask() {
        let mut server = mockito::Server::new_async().await;
        let file = |state: &str| {
            json!({ "name": "files/v1", "uri": "https://x/files/v1", "state": state, "mimeType": "video/mp4" })
        };
        let _upload = server
            .mock("POST", "/upload/v1beta/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "file": file("PROCESSING") }).to_string())
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v1beta/files/v1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(file("ACTIVE").to_string())
            .create_async()
            .await;
        let _ask = server
            .mock("POST", "/v1beta/models/gemini-1.5-pro:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "candidates": [{ "content": { "parts": [{ "text": "A red car." }] } }] }).to_string())
            .create_async()
            .await;

        let settings = GeminiSettings {
            api_key: "g-key".into(),
            model: "gemini-1.5-pro".into(),
        };
        let gemini = Arc::new(Gemini::with_base_url(&settings, &server.url()));
        let files = gemini.files().with_poll_interval(Duration::from_millis(5));
        let assistant = VideoAssistant::with_files(gemini, files);

        let answer = assistant
            .ask(
                VideoUpload {
                    file_name: "clip.mp4".into(),
                    bytes: vec![0; 16],
                },
                "Describe the video",
            )
            .await
            .unwrap();
        assert_eq!(answer, "A red car.");
    }
}
