use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FunctionCall,
        FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CrewError, Result};
use crate::registry::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Provider-neutral chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// A function call requested by the model. `arguments` is the raw JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// What the model decided to do with a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Final(String),
    ToolCalls { content: String, calls: Vec<ToolCall> },
}

pub type TextStream = BoxStream<'static, Result<String>>;

/// Inference backend seam. Implemented by [`Brain`] (OpenAI) and
/// [`crate::gemini::Gemini`], and by scripted fakes in tests.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn respond(&self, request: &ChatRequest) -> Result<ModelReply>;

    /// Incremental text. Backends without streaming yield one chunk.
    async fn stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let text = match self.respond(request).await? {
            ModelReply::Final(text) => text,
            ModelReply::ToolCalls { content, .. } => content,
        };
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// OpenAI chat-completions client.
pub struct Brain {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Brain {
    pub fn new(config: &Config) -> Self {
        let mut openai = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());
        if let Some(base) = &config.openai_api_base {
            openai = openai.with_api_base(base.clone());
        }
        let client = Client::with_config(openai);

        info!("Brain connected. Default model: {}", config.default_model);
        Self {
            client,
            model: config.default_model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Startup connectivity check.
    pub async fn say_hello(&self) -> Result<String> {
        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::user("Hello! Reply with 'System Online'.")],
        );
        match self.respond(&request).await? {
            ModelReply::Final(text) => Ok(text),
            ModelReply::ToolCalls { content, .. } => Ok(content),
        }
    }

    fn build_request(&self, request: &ChatRequest) -> Result<CreateChatCompletionRequest> {
        let messages = request
            .messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model).messages(messages);
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            args.max_tokens(max_tokens);
        }
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_openai_tool)
                .collect::<Result<Vec<_>>>()?;
            args.tools(tools);
        }
        Ok(args.build()?)
    }
}

#[async_trait]
impl LanguageModel for Brain {
    async fn respond(&self, request: &ChatRequest) -> Result<ModelReply> {
        let openai_request = self.build_request(request)?;
        debug!(model = %request.model, messages = request.messages.len(), "chat completion");

        let response = self.client.chat().create(openai_request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CrewError::Provider("completion returned no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        match choice.message.tool_calls {
            Some(calls) if !calls.is_empty() => Ok(ModelReply::ToolCalls {
                content,
                calls: calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect(),
            }),
            _ => Ok(ModelReply::Final(content)),
        }
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let openai_request = self.build_request(request)?;
        let chunks = self.client.chat().create_stream(openai_request).await?;

        let text = chunks.filter_map(|item| async move {
            match item {
                Ok(chunk) => {
                    let delta: String = chunk
                        .choices
                        .iter()
                        .filter_map(|choice| choice.delta.content.as_deref())
                        .collect();
                    (!delta.is_empty()).then_some(Ok(delta))
                }
                Err(err) => Some(Err(CrewError::from(err))),
            }
        });
        Ok(text.boxed())
    }
}

fn to_openai_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let converted = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.as_str())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.as_str())
            .build()?
            .into(),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if !message.content.is_empty() {
                args.content(message.content.as_str());
            }
            if !message.tool_calls.is_empty() {
                args.tool_calls(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            args.build()?.into()
        }
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(message.content.as_str())
            .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
            .build()?
            .into(),
    };
    Ok(converted)
}

// Registry tools -> OpenAI tools. The JSON schema is passed through as-is.
fn to_openai_tool(tool: &ToolDefinition) -> Result<ChatCompletionTool> {
    let function = FunctionObjectArgs::default()
        .name(&tool.name)
        .description(&tool.description)
        .parameters(tool.parameters.clone())
        .build()?;
    Ok(ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn brain_for(server: &mockito::Server) -> Brain {
        let config = Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_API_BASE" => Some(server.url()),
            _ => None,
        })
        .unwrap();
        Brain::new(&config)
    }

    fn completion(message: serde_json::Value) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-3.5-turbo",
            "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn final_text_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(json!({ "role": "assistant", "content": "System Online" })))
            .create_async()
            .await;

        let brain = brain_for(&server);
        assert_eq!(brain.say_hello().await.unwrap(), "System Online");
    }

    #[tokio::test]
    async fn tool_call_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({
                "tools": [{ "type": "function", "function": { "name": "web_search" } }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "web_search", "arguments": "{\"search_query\":\"rust\"}" }
                }]
            })))
            .create_async()
            .await;

        let brain = brain_for(&server);
        let request = ChatRequest::new("gpt-3.5-turbo", vec![ChatMessage::user("find rust news")])
            .with_tools(vec![ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            }]);

        let reply = brain.respond(&request).await.unwrap();
        assert_eq!(
            reply,
            ModelReply::ToolCalls {
                content: String::new(),
                calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "web_search".into(),
                    arguments: "{\"search_query\":\"rust\"}".into(),
                }],
            }
        );
    }

    #[tokio::test]
    async fn api_failure_maps_to_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"bad key","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#)
            .create_async()
            .await;

        let brain = brain_for(&server);
        let err = brain.say_hello().await.unwrap_err();
        assert!(matches!(err, CrewError::Provider(_)));
    }

    #[test]
    fn tool_messages_keep_call_id() {
        let message = ChatMessage::tool("call_9", "result");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
        assert!(to_openai_message(&message).is_ok());
    }
}
