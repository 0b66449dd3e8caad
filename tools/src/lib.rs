//! Native tools the agents can call: web search, article fetching and
//! topic-focused article summaries.

pub mod fetch;
pub mod scrape;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ironcrew_core::{Config, LanguageModel, ToolRegistry};
use reqwest::Client;
use tracing::info;

pub use fetch::{FetchArticleTool, HttpFetcher, PageFetcher};
pub use scrape::WebScraperTool;
pub use search::{DuckDuckGo, SearchBackend, SearchHit, WebSearchTool};

const USER_AGENT: &str = concat!("ironcrew/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry holding every [`ironcrew_core::ToolId`], wired to live HTTP
/// backends. `model` is used by `web_scraper` for its summaries.
pub fn standard_registry(config: &Config, model: Arc<dyn LanguageModel>) -> anyhow::Result<ToolRegistry> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client for tools")?;

    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(client.clone()));
    let search: Arc<dyn SearchBackend> = Arc::new(DuckDuckGo::new(client, config.search_url.clone()));

    let registry = ToolRegistry::new()
        .with(Arc::new(WebSearchTool::new(search)))
        .with(Arc::new(FetchArticleTool::new(fetcher.clone())))
        .with(Arc::new(WebScraperTool::new(fetcher, model, config.summary_model.clone())));

    info!(tools = ?registry.ids(), "tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironcrew_core::testing::ScriptedModel;
    use ironcrew_core::{ModelReply, ToolId};

    #[test]
    fn standard_registry_covers_every_tool() {
        let config = Config::from_lookup(|key| (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())).unwrap();
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Final("ok".into())));
        let registry = standard_registry(&config, model).unwrap();

        assert_eq!(registry.len(), ToolId::ALL.len());
        for id in ToolId::ALL {
            let tool = registry.get(id).unwrap();
            assert_eq!(tool.definition().name, id.as_str());
        }
    }
}
