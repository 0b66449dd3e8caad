//! Article fetching: download a page and reduce it to readable text.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use htmd::HtmlToMarkdown;
use ironcrew_core::{Tool, ToolDefinition, ToolId};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

pub const DEFAULT_MAX_CHARS: usize = 24_000;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> anyhow::Result<String>;
}

pub struct HttpFetcher {
    client: Client,
    max_chars: usize,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        let parsed = Url::parse(url).with_context(|| format!("invalid url '{url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("unsupported url scheme '{}'", parsed.scheme());
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));
        let body = response.text().await.context("failed to read page body")?;

        let text = if is_html { html_to_text(&body)? } else { body };
        let text = text.trim();
        if text.is_empty() {
            bail!("no readable content at {url}");
        }
        debug!(url, chars = text.chars().count(), "page fetched");
        Ok(truncate_chars(text, self.max_chars))
    }
}

/// Markdown rendering of a page, without scripts, styles and chrome.
pub fn html_to_text(html: &str) -> anyhow::Result<String> {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe", "nav", "header", "footer", "svg"])
        .build();
    converter.convert(html).context("failed to convert HTML")
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(&format!("\n... [truncated, total_chars={total}]"));
    out
}

#[derive(Deserialize)]
struct Params {
    url: String,
}

/// `fetch_article`: the readable text of one page.
pub struct FetchArticleTool {
    fetcher: Arc<dyn PageFetcher>,
}

impl FetchArticleTool {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for FetchArticleTool {
    fn id(&self) -> ToolId {
        ToolId::FetchArticle
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolId::FetchArticle.to_string(),
            description: "Downloads a web page and returns its main text content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The http(s) URL to read." }
                },
                "required": ["url"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(args)?;
        Ok(Value::String(self.fetcher.fetch_text(&params.url).await?))
    }
}
