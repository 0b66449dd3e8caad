use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CrewError, Result};
use crate::llm::{ChatMessage, ChatRequest, LanguageModel, ModelReply, TextStream};

const CHAT_MODEL: &str = "gpt-4";
const CHAT_MAX_TOKENS: u32 = 1500;
const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;
const ATTACHMENT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "pdf", "txt", "md", "csv"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub name: String,
    pub icon: String,
    pub system_prompt: String,
}

impl Persona {
    fn mechanic(name: &str, icon: &str) -> Self {
        Self {
            name: name.to_string(),
            icon: icon.to_string(),
            system_prompt: format!("You are an assistant named {name} specialised in mechanics."),
        }
    }
}

/// The closed list of assistants a chat may address.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self { personas }
    }

    pub fn standard() -> Self {
        Self::new(
            [
                "GPTBay",
                "specialiste_du_vrac",
                "Scraping and Crawling Expert Code (RAG)",
                "Hybrid Designer",
                "SaaS starter",
                "Math tuthor",
            ]
            .into_iter()
            .map(|name| Persona::mechanic(name, "👨‍💻"))
            .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
}

/// Conversation state owned by the caller: passed into every chat call and
/// handed back updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Persona that answered the latest turn.
    #[serde(default)]
    pub assistant: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl ChatSession {
    /// Appends a completed exchange and records who answered it.
    pub fn record(&mut self, persona: &str, user: impl Into<String>, assistant: impl Into<String>) {
        self.assistant = Some(persona.to_string());
        self.push(user, assistant);
    }

    pub fn push(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.history.push(ChatTurn {
            user: user.into(),
            assistant: assistant.into(),
        });
    }
}

/// Metadata for a file the user attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub size_bytes: u64,
}

impl Attachment {
    pub fn validate(&self) -> Result<()> {
        let extension = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension {
            Some(ext) if ATTACHMENT_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(CrewError::InvalidUpload(format!(
                    "'{}' is not a supported file type",
                    self.file_name
                )))
            }
        }
        if self.size_bytes == 0 {
            return Err(CrewError::InvalidUpload(format!("'{}' is empty", self.file_name)));
        }
        if self.size_bytes > MAX_ATTACHMENT_BYTES {
            return Err(CrewError::InvalidUpload(format!(
                "'{}' exceeds {} MB",
                self.file_name,
                MAX_ATTACHMENT_BYTES / (1024 * 1024)
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInput {
    pub message: String,
    pub assistant: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ChatInput {
    pub fn new(message: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            assistant: assistant.into(),
            temperature: default_temperature(),
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub session: ChatSession,
    /// Set when the backend failed; the session is then unchanged.
    pub error: Option<String>,
}

pub struct ChatService {
    model: Arc<dyn LanguageModel>,
    personas: PersonaCatalog,
    model_name: String,
}

impl ChatService {
    pub fn new(model: Arc<dyn LanguageModel>, personas: PersonaCatalog) -> Self {
        Self {
            model,
            personas,
            model_name: CHAT_MODEL.to_string(),
        }
    }

    pub fn personas(&self) -> &PersonaCatalog {
        &self.personas
    }

    /// Validates the input and builds the request. Nothing is sent.
    fn prepare(&self, session: &ChatSession, input: &ChatInput) -> Result<(ChatRequest, &Persona)> {
        let persona = self
            .personas
            .get(&input.assistant)
            .ok_or_else(|| CrewError::UnknownAssistant(input.assistant.clone()))?;
        if input.message.trim().is_empty() {
            return Err(CrewError::InvalidInput("message is empty".into()));
        }
        if let Some(attachment) = &input.attachment {
            attachment.validate()?;
        }

        let mut messages = vec![ChatMessage::system(persona.system_prompt.clone())];
        for turn in &session.history {
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.assistant.clone()));
        }
        messages.push(ChatMessage::user(input.message.clone()));

        let temperature = if input.temperature.is_finite() {
            input.temperature.clamp(0.0, 1.0)
        } else {
            default_temperature()
        };
        let request = ChatRequest::new(self.model_name.clone(), messages)
            .with_temperature(temperature)
            .with_max_tokens(CHAT_MAX_TOKENS);
        Ok((request, persona))
    }

    /// One chat exchange. Invalid input is an `Err` and no API call is made;
    /// a backend failure is reported in `ChatReply::error`.
    pub async fn reply(&self, mut session: ChatSession, input: ChatInput) -> Result<ChatReply> {
        let (request, persona) = self.prepare(&session, &input)?;
        info!(assistant = %persona.name, turns = session.history.len(), "chat request");

        match self.model.respond(&request).await {
            Ok(reply) => {
                let text = match reply {
                    ModelReply::Final(text) => text,
                    ModelReply::ToolCalls { content, .. } => content,
                };
                let mut answer = format!("{} {}", persona.icon, text.trim());
                if let Some(note) = attachment_note(&input) {
                    answer.push_str(&note);
                }
                session.record(&persona.name, input.message, answer);
                Ok(ChatReply { session, error: None })
            }
            Err(err) => {
                warn!(assistant = %persona.name, error = %err, "chat request failed");
                Ok(ChatReply {
                    session,
                    error: Some(format!("Error from the OpenAI API: {err}")),
                })
            }
        }
    }

    /// Streaming variant: the icon, then model chunks as they arrive, then
    /// the attachment note. The caller appends the concatenated turn.
    pub async fn stream(&self, session: &ChatSession, input: &ChatInput) -> Result<TextStream> {
        let (request, persona) = self.prepare(session, input)?;
        info!(assistant = %persona.name, "streaming chat request");

        let chunks = self.model.stream(&request).await?;
        let head = stream::once(futures::future::ready(Ok(format!("{} ", persona.icon))));
        let tail = stream::iter(attachment_note(input).map(Ok));
        Ok(head.chain(chunks).chain(tail).boxed())
    }
}

fn attachment_note(input: &ChatInput) -> Option<String> {
    input
        .attachment
        .as_ref()
        .map(|a| format!("\nYou uploaded a file: {}.", a.file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::testing::ScriptedModel;
    use futures::TryStreamExt;

    fn input(message: &str, assistant: &str) -> ChatInput {
        ChatInput::new(message, assistant)
    }

    fn service(model: Arc<ScriptedModel>) -> ChatService {
        ChatService::new(model, PersonaCatalog::standard())
    }

    #[tokio::test]
    async fn reply_appends_turn_and_sends_history() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Final("first answer".into()),
            ModelReply::Final("second answer".into()),
        ]));
        let chat = service(model.clone());

        let reply = chat.reply(ChatSession::default(), input("hello", "GPTBay")).await.unwrap();
        assert_eq!(reply.session.history[0].assistant, "👨‍💻 first answer");

        let reply = chat.reply(reply.session, input("again", "GPTBay")).await.unwrap();
        assert_eq!(reply.session.history.len(), 2);
        assert!(reply.error.is_none());

        let request = &model.requests()[1];
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(request.messages[0].content.contains("named GPTBay"));
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.max_tokens, Some(1500));
    }

    #[tokio::test]
    async fn catalog_has_exactly_six_personas() {
        let catalog = PersonaCatalog::standard();
        assert_eq!(catalog.names().len(), 6);
        assert!(catalog.get("OBD2 Diagnostic").is_none());

        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("check the sensor".into())));
        let err = service(model.clone())
            .reply(ChatSession::default(), input("P0420?", "OBD2 Diagnostic"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::UnknownAssistant(name) if name == "OBD2 Diagnostic"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn session_remembers_answering_assistant() {
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("ok".into())));
        let chat = service(model);

        let reply = chat.reply(ChatSession::default(), input("hi", "GPTBay")).await.unwrap();
        assert_eq!(reply.session.assistant.as_deref(), Some("GPTBay"));

        let reply = chat.reply(reply.session, input("and?", "Math tuthor")).await.unwrap();
        assert_eq!(reply.session.assistant.as_deref(), Some("Math tuthor"));
        assert_eq!(reply.session.history.len(), 2);

        let legacy: ChatSession = serde_json::from_str(r#"{ "history": [] }"#).unwrap();
        assert_eq!(legacy, ChatSession::default());
    }

    #[tokio::test]
    async fn unknown_assistant_is_rejected_before_any_call() {
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("x".into())));
        let err = service(model.clone())
            .reply(ChatSession::default(), input("hi", "Nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::UnknownAssistant(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn bad_attachment_is_rejected_before_any_call() {
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("x".into())));
        let mut msg = input("look", "GPTBay");
        msg.attachment = Some(Attachment {
            file_name: "payload.exe".into(),
            size_bytes: 10,
        });
        let err = service(model.clone()).reply(ChatSession::default(), msg).await.unwrap_err();
        assert!(matches!(err, CrewError::InvalidUpload(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn attachment_is_noted_in_answer() {
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("nice engine".into())));
        let mut msg = input("look", "GPTBay");
        msg.attachment = Some(Attachment {
            file_name: "engine.JPG".into(),
            size_bytes: 2048,
        });
        let reply = service(model).reply(ChatSession::default(), msg).await.unwrap();
        assert_eq!(
            reply.session.history[0].assistant,
            "👨‍💻 nice engine\nYou uploaded a file: engine.JPG."
        );
    }

    #[tokio::test]
    async fn backend_failure_keeps_session() {
        let model = Arc::new(ScriptedModel::failing("quota exceeded"));
        let mut session = ChatSession::default();
        session.push("earlier", "answer");

        let reply = service(model).reply(session.clone(), input("hi", "GPTBay")).await.unwrap();
        assert_eq!(reply.session, session);
        assert!(reply.error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn temperature_is_clamped() {
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("x".into())));
        let mut msg = input("hi", "GPTBay");
        msg.temperature = 3.0;
        service(model.clone()).reply(ChatSession::default(), msg).await.unwrap();
        assert_eq!(model.requests()[0].temperature, Some(1.0));
    }

    #[tokio::test]
    async fn stream_yields_icon_then_chunks() {
        let model = Arc::new(ScriptedModel::streaming(&["Chec", "k oil"]));
        let chunks: Vec<String> = service(model)
            .stream(&ChatSession::default(), &input("noise?", "GPTBay"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["👨‍💻 ", "Chec", "k oil"]);
    }
}
