//! Gemini generateContent client and File API.

pub mod files;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeminiSettings;
use crate::error::{CrewError, Result};
use crate::llm::{ChatMessage, ChatRequest, LanguageModel, ModelReply, Role};

pub use files::{FileApi, FileState, GeminiFile};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FileData(FileData),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct Gemini {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    pub fn new(settings: &GeminiSettings) -> Self {
        Self::with_base_url(settings, GEMINI_BASE_URL)
    }

    pub fn with_base_url(settings: &GeminiSettings, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// File API handle sharing this client's credentials and connection pool.
    pub fn files(&self) -> FileApi {
        FileApi::new(self.client.clone(), self.api_key.clone(), self.base_url.clone())
    }

    /// Asks a question about an uploaded (active) file.
    pub async fn ask_about_file(&self, file: &GeminiFile, prompt: &str) -> Result<String> {
        let contents = vec![Content {
            role: Some("user".into()),
            parts: vec![
                Part::FileData(FileData {
                    mime_type: file.mime_type.clone(),
                    file_uri: file.uri.clone(),
                }),
                Part::Text(prompt.to_string()),
            ],
        }];
        self.generate(&self.model, None, contents, GenerationConfig {
            temperature: None,
            max_output_tokens: None,
        })
        .await
    }

    async fn generate(
        &self,
        model: &str,
        system_instruction: Option<Content>,
        contents: Vec<Content>,
        generation_config: GenerationConfig,
    ) -> Result<String> {
        let body = GenerateRequest {
            system_instruction,
            contents,
            generation_config,
        };
        debug!(model, contents = body.contents.len(), "gemini generateContent");

        let response = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(files::http_error(status, &text, "generateContent"));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .ok_or_else(|| CrewError::Provider("Gemini returned no candidates".into()))?;
        Ok(text)
    }
}

fn to_contents(messages: &[ChatMessage]) -> (Option<Content>, Vec<Content>) {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        let role = match message.role {
            Role::System => {
                system.push(Part::Text(message.content.clone()));
                continue;
            }
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };
        contents.push(Content {
            role: Some(role.to_string()),
            parts: vec![Part::Text(message.content.clone())],
        });
    }
    let system = (!system.is_empty()).then_some(Content { role: None, parts: system });
    (system, contents)
}

#[async_trait]
impl LanguageModel for Gemini {
    /// Tool definitions are not forwarded; Gemini always answers in text here.
    async fn respond(&self, request: &ChatRequest) -> Result<ModelReply> {
        let (system, contents) = to_contents(&request.messages);
        let model = if request.model.starts_with("gemini") {
            request.model.as_str()
        } else {
            self.model.as_str()
        };
        let text = self
            .generate(
                model,
                system,
                contents,
                GenerationConfig {
                    temperature: request.temperature,
                    max_output_tokens: request.max_tokens,
                },
            )
            .await?;
        Ok(ModelReply::Final(text))
    }
}
