//! Scripted stand-ins for models and tools, for tests in this workspace.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::error::{CrewError, Result};
use crate::llm::{ChatRequest, LanguageModel, ModelReply, TextStream};
use crate::registry::{Tool, ToolDefinition, ToolId};

type Handler = Box<dyn Fn(&ChatRequest) -> Result<ModelReply> + Send + Sync>;

/// A model whose replies are decided up front (or by a closure), recording
/// every request it receives.
pub struct ScriptedModel {
    handler: Handler,
    chunks: Option<Vec<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    /// Replies in order; errors once the script runs out.
    pub fn new(replies: Vec<ModelReply>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::from_fn(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CrewError::Provider("script exhausted".into()))
        })
    }

    pub fn repeating(reply: ModelReply) -> Self {
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::from_fn(move |_| Err(CrewError::Provider(message.clone())))
    }

    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ModelReply> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            chunks: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Final answer delivered as the given stream chunks.
    pub fn streaming(chunks: &[&str]) -> Self {
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        let joined = chunks.concat();
        Self {
            chunks: Some(chunks),
            ..Self::repeating(ModelReply::Final(joined))
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn respond(&self, request: &ChatRequest) -> Result<ModelReply> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TextStream> {
        match &self.chunks {
            Some(chunks) => {
                self.requests.lock().unwrap().push(request.clone());
                let items: Vec<Result<String>> = chunks.iter().cloned().map(Ok).collect();
                Ok(stream::iter(items).boxed())
            }
            None => {
                let text = match self.respond(request).await? {
                    ModelReply::Final(text) => text,
                    ModelReply::ToolCalls { content, .. } => content,
                };
                Ok(stream::once(async move { Ok(text) }).boxed())
            }
        }
    }
}

/// A tool that always errors, counting its invocations.
pub struct FailingTool {
    id: ToolId,
    calls: AtomicUsize,
}

impl FailingTool {
    pub fn new(id: ToolId) -> Self {
        Self {
            id,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> ToolId {
        self.id
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.id.to_string(),
            description: "always fails".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("upstream unavailable")
    }
}

/// A tool that returns a fixed value, counting its invocations.
pub struct StaticTool {
    id: ToolId,
    output: Value,
    calls: AtomicUsize,
}

impl StaticTool {
    pub fn new(id: ToolId, output: Value) -> Self {
        Self {
            id,
            output,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn id(&self) -> ToolId {
        self.id
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.id.to_string(),
            description: "returns a canned value".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
