//! IronCrew core: agents, tasks and the sequential crew that runs them,
//! plus the LLM clients and tool runtime they depend on.

pub mod agent;
pub mod blueprint;
pub mod chat;
pub mod config;
pub mod crew;
pub mod error;
pub mod gemini;
pub mod llm;
pub mod rate;
pub mod registry;
pub mod runtime;
pub mod task;
pub mod video;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blueprint::{AgentSpec, Blueprint, BlueprintLibrary, LlmSettings, TaskSpec};
pub use config::Config;
pub use crew::{Crew, CrewOutput};
pub use error::{CrewError, Result};
pub use llm::{Brain, ChatMessage, ChatRequest, LanguageModel, ModelReply, ToolCall};
pub use registry::{Tool, ToolDefinition, ToolId, ToolRegistry};
pub use runtime::{ToolInvocation, ToolRuntime};
pub use task::{Finish, TaskOutput};
