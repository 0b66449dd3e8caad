use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ironcrew_core::chat::{Attachment, ChatInput, ChatSession};
use ironcrew_core::{CrewError, CrewOutput, TaskOutput};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

// Input: what the UI sends to start a crew
#[derive(Debug, Deserialize)]
pub struct KickoffRequest {
    pub topic: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
}

// Output: one crew run
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub output: String,
    pub tasks: Vec<TaskOutput>,
}

impl RunResponse {
    pub fn finished(output: CrewOutput) -> Self {
        let status = if output.is_partial() {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        Self {
            run_id: Some(output.run_id),
            status,
            output: output.final_output,
            tasks: output.tasks,
        }
    }

    pub fn failed(err: &CrewError) -> Self {
        Self {
            run_id: None,
            status: RunStatus::Failed,
            output: format!("Error: {err}"),
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CrewSummary {
    pub name: String,
    pub description: String,
    pub agents: Vec<String>,
    pub tasks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub crews: Vec<CrewSummary>,
    pub models: Vec<String>,
    pub default_model: String,
    pub assistants: Vec<String>,
    pub video_enabled: bool,
}

/// Chat call: the caller's session plus the new message.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub session: ChatSession,
    #[serde(flatten)]
    pub input: ChatInput,
}

/// Accepts either a JSON body or a `multipart/form-data` form with the
/// fields `session` (JSON), `message`, `assistant`, `temperature` and an
/// optional `file`. The attachment is described from the uploaded bytes.
impl<S> FromRequest<S> for ChatBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_form {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Self::from_form(multipart).await.map_err(IntoResponse::into_response)
        } else {
            let Json(body) = Json::<ChatBody>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(body)
        }
    }
}

impl ChatBody {
    async fn from_form(mut multipart: Multipart) -> Result<Self, ApiError> {
        let bad = |what: &str, e: &dyn std::fmt::Display| ApiError::BadRequest(format!("{what}: {e}"));

        let mut session = ChatSession::default();
        let mut input = ChatInput::new("", "");
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad("invalid multipart body", &e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| bad("failed to read upload", &e))?;
                // Browsers send a part with an empty file name when no file was picked.
                if !file_name.is_empty() {
                    input.attachment = Some(Attachment {
                        file_name,
                        size_bytes: bytes.len() as u64,
                    });
                }
                continue;
            }

            let text = field.text().await.map_err(|e| bad("failed to read form field", &e))?;
            match name.as_str() {
                "session" if !text.trim().is_empty() => {
                    session = serde_json::from_str(&text).map_err(|e| bad("invalid session", &e))?;
                }
                "message" => input.message = text,
                "assistant" => input.assistant = text,
                "temperature" => {
                    input.temperature = text.trim().parse::<f32>().map_err(|e| bad("invalid temperature", &e))?;
                }
                _ => {}
            }
        }
        Ok(Self { session, input })
    }
}

#[derive(Debug, Serialize)]
pub struct VideoAnswer {
    pub answer: String,
}

/// Errors a handler turns into an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    Crew(CrewError),
    NotFound(String),
    BadRequest(String),
}

impl From<CrewError> for ApiError {
    fn from(err: CrewError) -> Self {
        ApiError::Crew(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Crew(err) if err.is_user_error() => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Crew(err @ CrewError::Provider(_)) => (StatusCode::BAD_GATEWAY, err.to_string()),
            ApiError::Crew(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
