//! Web search through the DuckDuckGo HTML endpoint.

use std::sync::{Arc, LazyLock};

use anyhow::Context;
use async_trait::async_trait;
use ironcrew_core::{Tool, ToolDefinition, ToolId};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a([^>]*class="result__a"[^>]*)>(.*?)</a>"#).expect("valid regex"));
static SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<(a|div|td)[^>]*class="result__snippet"[^>]*>(.*?)</(?:a|div|td)>"#).expect("valid regex")
});
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Day,
    Week,
    Month,
    Year,
    Any,
}

impl Recency {
    fn code(self) -> &'static str {
        match self {
            Recency::Day => "d",
            Recency::Week => "w",
            Recency::Month => "m",
            Recency::Year => "y",
            Recency::Any => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub max_results: usize,
    pub recency: Recency,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<SearchHit>>;
}

pub struct DuckDuckGo {
    client: Client,
    endpoint: String,
}

impl DuckDuckGo {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGo {
    async fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<SearchHit>> {
        debug!(query = %query.text, "duckduckgo search");
        let html = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query.text.as_str()), ("df", query.recency.code())])
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search endpoint returned an error")?
            .text()
            .await
            .context("failed to read search response")?;

        let hits = parse_results(&html, query.max_results);
        debug!(hits = hits.len(), "search parsed");
        Ok(hits)
    }
}

/// Extracts organic results from a DuckDuckGo HTML page, skipping ads.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let titles: Vec<_> = TITLE_RE.captures_iter(html).collect();
    let snippets: Vec<(usize, String)> = SNIPPET_RE
        .captures_iter(html)
        .filter_map(|c| Some((c.get(0)?.start(), clean_text(c.get(2)?.as_str()))))
        .collect();

    let mut hits = Vec::new();
    for (i, caps) in titles.iter().enumerate() {
        if hits.len() >= max_results {
            break;
        }
        let (Some(whole), Some(attrs), Some(label)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(href) = HREF_RE.captures(attrs.as_str()).and_then(|h| h.get(1)) else {
            continue;
        };
        let Some(link) = resolve_link(&decode_entities(href.as_str())) else {
            continue;
        };

        let next_start = titles
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map_or(html.len(), |m| m.start());
        let snippet = snippets
            .iter()
            .find(|(pos, _)| *pos > whole.end() && *pos < next_start)
            .map(|(_, text)| text.clone())
            .unwrap_or_default();

        hits.push(SearchHit {
            title: clean_text(label.as_str()),
            snippet,
            link,
        });
    }
    hits
}

/// Unwraps DuckDuckGo redirect links (`//duckduckgo.com/l/?uddg=...`).
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    if url.host_str().is_some_and(|h| h.ends_with("duckduckgo.com")) {
        if url.path() == "/y.js" {
            return None;
        }
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, "");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// `web_search`: a handful of recent results for a query.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    max_results: usize,
    recency: Recency,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            max_results: 5,
            recency: Recency::Month,
        }
    }
}

#[derive(Deserialize)]
struct Params {
    search_query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> ToolId {
        ToolId::WebSearch
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolId::WebSearch.to_string(),
            description: "Searches the web and returns a list of results, each with a title, \
                          a snippet of the page and the link to it."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "search_query": {
                        "type": "string",
                        "description": "A clear, concise query describing the information needed."
                    }
                },
                "required": ["search_query"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(args)?;
        let query = SearchQuery {
            text: params.search_query,
            max_results: self.max_results,
            recency: self.recency,
        };
        let hits = self.backend.search(&query).await?;
        Ok(serde_json::to_value(hits)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::sync::Mutex;

    const PAGE: &str = r##"
<div class="result results_links result--ad">
  <a rel="nofollow" class="result__a" href="https://duckduckgo.com/y.js?ad_provider=x">Sponsored</a>
  <a class="result__snippet" href="#">Buy now</a>
</div>
<div class="result results_links">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">A language empowering everyone to build reliable &amp; efficient software.</a>
</div>
<div class="result results_links">
  <a class="result__a" rel="nofollow" href="https://blog.rust-lang.org/">Rust Blog</a>
</div>
<div class="result results_links">
  <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
  <a class="result__snippet" href="#">Learn   Rust</a>
</div>
"##;

    #[test]
    fn parses_titles_snippets_and_links() {
        let hits = parse_results(PAGE, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(
            hits[0],
            SearchHit {
                title: "The Rust Programming Language".into(),
                snippet: "A language empowering everyone to build reliable & efficient software.".into(),
                link: "https://www.rust-lang.org/".into(),
            }
        );
        assert_eq!(hits[1].link, "https://blog.rust-lang.org/");
        assert_eq!(hits[1].snippet, "");
        assert_eq!(hits[2].snippet, "Learn Rust");
    }

    #[test]
    fn respects_max_results() {
        assert_eq!(parse_results(PAGE, 1).len(), 1);
        assert!(parse_results("<html></html>", 5).is_empty());
    }

    #[tokio::test]
    async fn duckduckgo_posts_query_with_recency() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/html/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "rust async".into()),
                Matcher::UrlEncoded("df".into(), "m".into()),
            ]))
            .with_status(200)
            .with_body(PAGE)
            .create_async()
            .await;

        let backend = DuckDuckGo::new(Client::new(), format!("{}/html/", server.url()));
        let hits = backend
            .search(&SearchQuery {
                text: "rust async".into(),
                max_results: 5,
                recency: Recency::Month,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        mock.assert_async().await;
    }

    struct Recorder(Mutex<Vec<SearchQuery>>);

    #[async_trait]
    impl SearchBackend for Recorder {
        async fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<SearchHit>> {
            self.0.lock().unwrap().push(query.clone());
            Ok(vec![SearchHit {
                title: "t".into(),
                snippet: "s".into(),
                link: "https://l".into(),
            }])
        }
    }

    #[tokio::test]
    async fn tool_uses_five_recent_results() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tool = WebSearchTool::new(recorder.clone());
        let out = tool.invoke(json!({ "search_query": "ev batteries" })).await.unwrap();

        assert_eq!(out, json!([{ "title": "t", "snippet": "s", "link": "https://l" }]));
        let query = recorder.0.lock().unwrap()[0].clone();
        assert_eq!(query.max_results, 5);
        assert_eq!(query.recency, Recency::Month);
        assert_eq!(query.text, "ev batteries");
    }
}
