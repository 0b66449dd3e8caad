use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ironcrew_core::{ChatMessage, ChatRequest, LanguageModel, ModelReply, Tool, ToolDefinition, ToolId};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::fetch::PageFetcher;

const SUMMARY_TEMPERATURE: f32 = 0.4;

#[derive(Deserialize)]
struct Params {
    url: String,
    topic: String,
}

/// `web_scraper`: reads an article and returns an LLM summary focused on a topic.
pub struct WebScraperTool {
    fetcher: Arc<dyn PageFetcher>,
    model: Arc<dyn LanguageModel>,
    summary_model: String,
}

impl WebScraperTool {
    pub fn new(fetcher: Arc<dyn PageFetcher>, model: Arc<dyn LanguageModel>, summary_model: impl Into<String>) -> Self {
        Self {
            fetcher,
            model,
            summary_model: summary_model.into(),
        }
    }

    fn summary_request(&self, topic: &str, content: &str) -> ChatRequest {
        let prompt = format!(
            "Generate a summary of the following content on the topic ## {topic} ###\n\nCONTENT:\n\n{content}"
        );
        ChatRequest::new(self.summary_model.clone(), vec![ChatMessage::user(prompt)])
            .with_temperature(SUMMARY_TEMPERATURE)
    }
}

#[async_trait]
impl Tool for WebScraperTool {
    fn id(&self) -> ToolId {
        ToolId::WebScraper
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolId::WebScraper.to_string(),
            description: "Reads the article at a URL and returns a summary of it focused on the given topic."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Link to the article." },
                    "topic": { "type": "string", "description": "What the summary should focus on." }
                },
                "required": ["url", "topic"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(args)?;
        let content = self.fetcher.fetch_text(&params.url).await?;
        debug!(url = %params.url, chars = content.len(), "summarizing article");

        let reply = self
            .model
            .respond(&self.summary_request(&params.topic, &content))
            .await
            .context("summary request failed")?;
        let summary = match reply {
            ModelReply::Final(text) => text,
            ModelReply::ToolCalls { content, .. } => content,
        };
        info!(url = %params.url, "article summarized");

        Ok(Value::String(format!(
            "###\nSummary:\n{}\n\nURL: {}\n###",
            summary.trim(),
            params.url
        )))
    }
}
