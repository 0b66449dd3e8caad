use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use ironcrew_core::chat::{ChatReply, ChatService, ChatSession};
use ironcrew_core::llm::TextStream;
use ironcrew_core::video::{VideoAssistant, VideoUpload};
use ironcrew_core::{Config, Crew, CrewError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::{ApiError, CatalogResponse, ChatBody, CrewSummary, KickoffRequest, RunResponse, VideoAnswer};

const INDEX_HTML: &str = include_str!("../assets/index.html");
const VIDEO_BODY_LIMIT: usize = 210 * 1024 * 1024;
// Chat attachments are capped at 20 MB; leave room for the other form fields.
const CHAT_BODY_LIMIT: usize = 21 * 1024 * 1024;

/// Everything a handler needs, built once at startup and shared read-only.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub crews: Arc<BTreeMap<String, Crew>>,
    pub chat: Arc<ChatService>,
    pub video: Option<Arc<VideoAssistant>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/crews", get(list_crews))
        .route("/crews/{name}/kickoff", post(kickoff))
        .route("/chat", post(chat).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)))
        .route("/chat/stream", post(chat_stream).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)))
        .route("/video/ask", post(video_ask).layer(DefaultBodyLimit::max(VIDEO_BODY_LIMIT)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// --- HANDLERS ---

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> &'static str {
    "IronCrew Gateway: Operational"
}

async fn list_crews(State(state): State<AppState>) -> Json<CatalogResponse> {
    let crews = state
        .crews
        .values()
        .map(|crew| {
            let bp = crew.blueprint();
            CrewSummary {
                name: bp.name.clone(),
                description: bp.description.clone(),
                agents: bp.agents.iter().map(|a| a.role.clone()).collect(),
                tasks: bp.tasks.iter().map(|t| t.id.clone()).collect(),
            }
        })
        .collect();

    Json(CatalogResponse {
        crews,
        models: state.config.allowed_models.clone(),
        default_model: state.config.default_model.clone(),
        assistants: state.chat.personas().names(),
        video_enabled: state.video.is_some(),
    })
}

async fn kickoff(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<KickoffRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let crew = state
        .crews
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("crew '{name}' does not exist")))?;

    let topic = payload.topic.trim();
    if topic.is_empty() {
        return Err(CrewError::InvalidInput("topic is empty".into()).into());
    }
    let model = state.config.resolve_model(payload.model.as_deref())?;
    info!(crew = %name, %topic, %model, "kickoff requested");

    let inputs = HashMap::from([("topic".to_string(), topic.to_string())]);
    match crew.kickoff(inputs, &model).await {
        Ok(output) => Ok(Json(RunResponse::finished(output))),
        Err(err) => {
            error!(crew = %name, error = %err, "crew run failed");
            Ok(Json(RunResponse::failed(&err)))
        }
    }
}

async fn chat(State(state): State<AppState>, body: ChatBody) -> Result<Json<ChatReply>, ApiError> {
    let reply = state.chat.reply(body.session, body.input).await?;
    Ok(Json(reply))
}

/// `chunk` events carry JSON-encoded text; the final `session` event carries
/// the session with the completed turn appended. Invalid input is a 400.
/// Backend failures, including one before the first chunk, arrive as an
/// `error` event on a 200 stream, mirroring `/chat`.
async fn chat_stream(
    State(state): State<AppState>,
    body: ChatBody,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, Result<Event, axum::Error>>>>, ApiError> {
    let ChatBody { session, input } = body;
    let events = match state.chat.stream(&session, &input).await {
        Ok(chunks) => session_events(chunks, session, input.assistant, input.message).boxed(),
        Err(err) if err.is_user_error() => return Err(err.into()),
        Err(err) => {
            warn!(assistant = %input.assistant, error = %err, "chat stream could not start");
            stream::once(future::ready(error_event(&err))).boxed()
        }
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn error_event(err: &CrewError) -> Result<Event, axum::Error> {
    Event::default()
        .event("error")
        .json_data(format!("Error from the OpenAI API: {err}"))
}

struct Streaming {
    chunks: TextStream,
    answer: String,
    session: ChatSession,
    persona: String,
    message: String,
}

fn session_events(
    chunks: TextStream,
    session: ChatSession,
    persona: String,
    message: String,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    let start = Streaming {
        chunks,
        answer: String::new(),
        session,
        persona,
        message,
    };
    stream::unfold(Some(start), |state| async move {
        let mut s = state?;
        match s.chunks.next().await {
            Some(Ok(chunk)) => {
                s.answer.push_str(&chunk);
                let event = Event::default().event("chunk").json_data(chunk);
                Some((event, Some(s)))
            }
            Some(Err(err)) => {
                warn!(error = %err, "chat stream failed");
                Some((error_event(&err), None))
            }
            None => {
                s.session.record(&s.persona, s.message, s.answer.trim());
                let event = Event::default().event("session").json_data(&s.session);
                Some((event, None))
            }
        }
    })
}

async fn video_ask(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<VideoAnswer>, ApiError> {
    let assistant = state
        .video
        .clone()
        .ok_or_else(|| ApiError::NotFound("video assistant is disabled: GEMINI_API_KEY is not set".into()))?;

    let mut upload = None;
    let mut prompt = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
                upload = Some(VideoUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "prompt" => {
                prompt = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read prompt: {e}")))?;
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("missing 'file' field".into()))?;
    info!(file = %upload.file_name, bytes = upload.bytes.len(), "video question");
    let answer = assistant.ask(upload, &prompt).await?;
    Ok(Json(VideoAnswer { answer }))
}
