use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::ToolCall;
use crate::registry::{ToolId, ToolRegistry};

/// Record of one tool call made while a task ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub failed: bool,
}

/// The observation handed back to the agent plus the bookkeeping record.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub observation: String,
    pub invocation: ToolInvocation,
}

/// Executes tool calls on behalf of agents.
///
/// Failures never abort a run: they come back as an observation the agent
/// can read, and are flagged on the invocation record.
#[derive(Clone, Debug)]
pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
}

impl ToolRuntime {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn run(&self, call: &ToolCall, allowed: &[ToolId]) -> ToolExecution {
        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(err) => {
                return failure(call, Value::String(call.arguments.clone()), format!("arguments are not valid JSON: {err}"));
            }
        };

        let tool = match call.name.parse::<ToolId>() {
            Ok(id) if allowed.contains(&id) => self.registry.get(id),
            _ => None,
        };
        let Some(tool) = tool else {
            return failure(call, arguments, "tool is not available to this agent".to_string());
        };

        if let Err(reason) = validate_arguments(&tool.definition().parameters, &arguments) {
            return failure(call, arguments, reason);
        }

        match tool.invoke(arguments.clone()).await {
            Ok(output) => {
                let observation = render_output(&output);
                info!(tool = %call.name, bytes = observation.len(), "tool call succeeded");
                ToolExecution {
                    observation,
                    invocation: ToolInvocation {
                        tool: call.name.clone(),
                        arguments,
                        failed: false,
                    },
                }
            }
            Err(err) => failure(call, arguments, format!("{err:#}")),
        }
    }
}

fn failure(call: &ToolCall, arguments: Value, reason: String) -> ToolExecution {
    warn!(tool = %call.name, %reason, "tool call failed");
    ToolExecution {
        observation: format!("Tool error ({}): {}", call.name, reason),
        invocation: ToolInvocation {
            tool: call.name.clone(),
            arguments,
            failed: true,
        },
    }
}

fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Checks the subset of JSON schema the tools declare: an object with
/// `required` keys and primitive `type`s on properties.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in object {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(format!("argument '{key}' must be of type {expected}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Tool, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::json;

    struct Search;

    #[async_trait]
    impl Tool for Search {
        fn id(&self) -> ToolId {
            ToolId::WebSearch
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "search_query": { "type": "string" } },
                    "required": ["search_query"]
                }),
            }
        }

        async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
            let query = args["search_query"].as_str().unwrap_or_default();
            if query == "boom" {
                anyhow::bail!("network unreachable");
            }
            Ok(json!([{ "title": query, "snippet": "s", "link": "https://x" }]))
        }
    }

    fn runtime() -> ToolRuntime {
        ToolRuntime::new(ToolRegistry::new().with(Arc::new(Search)))
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[tokio::test]
    async fn structured_output_is_rendered_as_json() {
        let exec = runtime()
            .run(&call("web_search", r#"{"search_query":"rust"}"#), &[ToolId::WebSearch])
            .await;
        assert!(!exec.invocation.failed);
        assert!(exec.observation.contains("\"title\": \"rust\""));
    }

    #[tokio::test]
    async fn handler_error_becomes_observation() {
        let exec = runtime()
            .run(&call("web_search", r#"{"search_query":"boom"}"#), &[ToolId::WebSearch])
            .await;
        assert!(exec.invocation.failed);
        assert_eq!(exec.observation, "Tool error (web_search): network unreachable");
    }

    #[tokio::test]
    async fn ungranted_tool_is_refused() {
        let exec = runtime()
            .run(&call("web_search", r#"{"search_query":"rust"}"#), &[ToolId::WebScraper])
            .await;
        assert!(exec.invocation.failed);
        assert!(exec.observation.contains("not available"));
    }

    #[tokio::test]
    async fn schema_violations_are_refused() {
        let rt = runtime();
        let missing = rt.run(&call("web_search", "{}"), &[ToolId::WebSearch]).await;
        assert!(missing.observation.contains("missing required argument 'search_query'"));

        let wrong_type = rt
            .run(&call("web_search", r#"{"search_query":5}"#), &[ToolId::WebSearch])
            .await;
        assert!(wrong_type.observation.contains("must be of type string"));

        let garbage = rt.run(&call("web_search", "not json"), &[ToolId::WebSearch]).await;
        assert!(garbage.invocation.failed);
    }
}
