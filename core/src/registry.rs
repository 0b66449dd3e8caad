use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CrewError, Result};

/// The closed set of capabilities an agent may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    WebSearch,
    WebScraper,
    FetchArticle,
}

impl ToolId {
    pub const ALL: [ToolId; 3] = [ToolId::WebSearch, ToolId::WebScraper, ToolId::FetchArticle];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::WebSearch => "web_search",
            ToolId::WebScraper => "web_scraper",
            ToolId::FetchArticle => "fetch_article",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = CrewError;

    fn from_str(s: &str) -> Result<Self> {
        ToolId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| CrewError::InvalidBlueprint(format!("unknown tool '{s}'")))
    }
}

/// What the model sees: name, description and the JSON schema of the arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A request/response capability. Implementations must not keep mutable
/// state between invocations.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;

    fn definition(&self) -> ToolDefinition;

    /// Arguments have already been checked against `definition().parameters`.
    async fn invoke(&self, args: Value) -> anyhow::Result<Value>;
}

/// Maps each [`ToolId`] to its handler.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolId, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.id(), tool);
        self
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, id: ToolId) -> Option<Arc<dyn Tool>> {
        self.tools.get(&id).cloned()
    }

    /// Looks a tool up by the name the model used.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Tool>> {
        name.parse::<ToolId>().ok().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn ids(&self) -> Vec<ToolId> {
        let mut ids: Vec<ToolId> = self.tools.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Definitions for a declared tool list, failing on anything unregistered.
    pub fn definitions_for(&self, ids: &[ToolId]) -> Result<Vec<ToolDefinition>> {
        ids.iter()
            .map(|id| {
                self.get(*id)
                    .map(|tool| tool.definition())
                    .ok_or_else(|| {
                        CrewError::InvalidBlueprint(format!("tool '{id}' is not registered"))
                    })
            })
            .collect()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn id(&self) -> ToolId {
            ToolId::FetchArticle
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.id().to_string(),
                description: "echo".into(),
                parameters: json!({ "type": "object" }),
            }
        }

        async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
            Ok(args)
        }
    }

    #[test]
    fn tool_ids_round_trip_through_names() {
        for id in ToolId::ALL {
            assert_eq!(id.as_str().parse::<ToolId>().unwrap(), id);
        }
        assert!("DuckDuckGoSearchResults".parse::<ToolId>().is_err());
    }

    #[test]
    fn tool_ids_deserialize_snake_case() {
        let ids: Vec<ToolId> = serde_json::from_str(r#"["web_search","web_scraper"]"#).unwrap();
        assert_eq!(ids, vec![ToolId::WebSearch, ToolId::WebScraper]);
    }

    #[test]
    fn definitions_require_registration() {
        let registry = ToolRegistry::new().with(Arc::new(Echo));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_name("fetch_article").is_some());
        assert!(registry.get_by_name("web_search").is_none());

        let defs = registry.definitions_for(&[ToolId::FetchArticle]).unwrap();
        assert_eq!(defs[0].name, "fetch_article");

        let err = registry.definitions_for(&[ToolId::WebSearch]).unwrap_err();
        assert!(err.to_string().contains("web_search"));
    }
}
