use tracing::{debug, info, warn};

use crate::blueprint::AgentSpec;
use crate::error::Result;
use crate::llm::{ChatMessage, ChatRequest, LanguageModel, ModelReply};
use crate::rate::RequestWindow;
use crate::registry::{ToolDefinition, ToolRegistry};
use crate::runtime::ToolRuntime;
use crate::task::{Finish, TaskOutput};

/// A configured persona bound to one run. Its request window is shared by
/// every task the agent performs in that run.
#[derive(Debug)]
pub struct Agent {
    spec: AgentSpec,
    tools: Vec<ToolDefinition>,
    window: RequestWindow,
}

impl Agent {
    /// Fails if the spec grants a tool the registry does not provide.
    pub fn new(spec: AgentSpec, registry: &ToolRegistry) -> Result<Self> {
        let tools = registry.definitions_for(&spec.tools)?;
        let window = RequestWindow::per_minute(spec.max_rpm);
        Ok(Self { spec, tools, window })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn role(&self) -> &str {
        &self.spec.role
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.spec.role.trim(),
            self.spec.backstory.trim(),
            self.spec.goal.trim()
        )
    }

    fn request(&self, model: &str, messages: &[ChatMessage]) -> ChatRequest {
        let mut request = ChatRequest::new(
            self.spec.llm.model.clone().unwrap_or_else(|| model.to_string()),
            messages.to_vec(),
        )
        .with_temperature(self.spec.llm.temperature)
        .with_tools(self.tools.clone());
        request.max_tokens = self.spec.llm.max_tokens;
        request
    }

    /// Runs the reasoning loop for one task.
    ///
    /// Each iteration is one model call, admitted through the request
    /// window. Tool calls are executed and their observations fed back.
    /// After `max_iter` iterations without a final answer the loop stops
    /// without another model call and returns the best partial output.
    pub async fn execute(
        &self,
        task_id: &str,
        prompt: String,
        model: &dyn LanguageModel,
        runtime: &ToolRuntime,
        default_model: &str,
    ) -> Result<TaskOutput> {
        let mut messages = vec![ChatMessage::system(self.system_prompt()), ChatMessage::user(prompt)];
        let mut invocations = Vec::new();
        let mut partial = String::new();
        let mut last_observation = String::new();

        for iteration in 1..=self.spec.max_iter {
            self.window.acquire().await;
            debug!(agent = %self.spec.id, task = task_id, iteration, "model call");

            match model.respond(&self.request(default_model, &messages)).await? {
                ModelReply::Final(text) => {
                    info!(agent = %self.spec.id, task = task_id, iteration, "task completed");
                    return Ok(TaskOutput {
                        task_id: task_id.to_string(),
                        agent_role: self.spec.role.clone(),
                        raw: text,
                        finish: Finish::Completed,
                        iterations: iteration,
                        tool_calls: invocations,
                    });
                }
                ModelReply::ToolCalls { content, calls } => {
                    if !content.trim().is_empty() {
                        partial = content.clone();
                    }
                    messages.push(ChatMessage::assistant_tool_calls(content, calls.clone()));
                    for call in &calls {
                        info!(agent = %self.spec.id, tool = %call.name, "agent requested tool");
                        let execution = runtime.run(call, &self.spec.tools).await;
                        messages.push(ChatMessage::tool(call.id.clone(), execution.observation.clone()));
                        last_observation = execution.observation;
                        invocations.push(execution.invocation);
                    }
                }
            }
        }

        warn!(
            agent = %self.spec.id,
            task = task_id,
            max_iter = self.spec.max_iter,
            "iteration limit reached; returning partial output"
        );
        Ok(TaskOutput {
            task_id: task_id.to_string(),
            agent_role: self.spec.role.clone(),
            raw: if partial.is_empty() { last_observation } else { partial },
            finish: Finish::IterationLimit,
            iterations: self.spec.max_iter,
            tool_calls: invocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::LlmSettings;
    use crate::llm::ToolCall;
    use crate::registry::{Tool, ToolId};
    use crate::testing::{FailingTool, ScriptedModel};
    use std::sync::Arc;

    fn spec(max_iter: u32) -> AgentSpec {
        AgentSpec {
            id: "researcher".into(),
            role: "Researcher".into(),
            goal: "Find facts".into(),
            backstory: "Meticulous.".into(),
            tools: vec![ToolId::WebSearch],
            llm: LlmSettings::default(),
            max_iter,
            max_rpm: None,
        }
    }

    fn search_call(id: &str) -> ModelReply {
        ModelReply::ToolCalls {
            content: String::new(),
            calls: vec![ToolCall {
                id: id.into(),
                name: "web_search".into(),
                arguments: r#"{"search_query":"x"}"#.into(),
            }],
        }
    }

    fn setup() -> (ToolRuntime, Arc<FailingTool>) {
        let tool = Arc::new(FailingTool::new(ToolId::WebSearch));
        let runtime = ToolRuntime::new(ToolRegistry::new().with(tool.clone() as Arc<dyn Tool>));
        (runtime, tool)
    }

    #[tokio::test]
    async fn max_iter_one_calls_failing_tool_exactly_once() {
        let (runtime, tool) = setup();
        let agent = Agent::new(spec(1), runtime.registry()).unwrap();
        let model = ScriptedModel::repeating(search_call("c"));

        let output = agent
            .execute("research", "go".into(), &model, &runtime, "gpt-4")
            .await
            .unwrap();

        assert_eq!(tool.calls(), 1);
        assert_eq!(model.calls(), 1);
        assert_eq!(output.finish, Finish::IterationLimit);
        assert_eq!(output.iterations, 1);
        assert!(output.raw.starts_with("Tool error (web_search)"));
        assert_eq!(output.failed_tool_calls(), 1);
    }

    #[tokio::test]
    async fn loop_stops_at_the_cap() {
        let (runtime, tool) = setup();
        let agent = Agent::new(spec(4), runtime.registry()).unwrap();
        let model = ScriptedModel::repeating(search_call("c"));

        let output = agent
            .execute("research", "go".into(), &model, &runtime, "gpt-4")
            .await
            .unwrap();

        assert_eq!(model.calls(), 4);
        assert_eq!(tool.calls(), 4);
        assert!(output.is_partial());
    }

    #[tokio::test]
    async fn observation_is_fed_back_before_final_answer() {
        let (runtime, _tool) = setup();
        let agent = Agent::new(spec(5), runtime.registry()).unwrap();
        let model = ScriptedModel::new(vec![search_call("c1"), ModelReply::Final("done".into())]);

        let output = agent
            .execute("research", "go".into(), &model, &runtime, "gpt-4")
            .await
            .unwrap();

        assert_eq!(output.raw, "done");
        assert_eq!(output.finish, Finish::Completed);
        assert_eq!(output.iterations, 2);

        let second = &model.requests()[1];
        let tool_message = second.messages.last().unwrap();
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
        assert!(tool_message.content.starts_with("Tool error (web_search)"));
    }

    #[tokio::test]
    async fn partial_output_prefers_model_text() {
        let (runtime, _tool) = setup();
        let agent = Agent::new(spec(1), runtime.registry()).unwrap();
        let model = ScriptedModel::new(vec![ModelReply::ToolCalls {
            content: "Thinking about X".into(),
            calls: vec![ToolCall {
                id: "c".into(),
                name: "web_search".into(),
                arguments: "{}".into(),
            }],
        }]);

        let output = agent
            .execute("research", "go".into(), &model, &runtime, "gpt-4")
            .await
            .unwrap();
        assert_eq!(output.raw, "Thinking about X");
    }

    #[tokio::test]
    async fn request_carries_persona_and_settings() {
        let (runtime, _tool) = setup();
        let mut agent_spec = spec(3);
        agent_spec.llm.model = Some("gpt-4".into());
        agent_spec.llm.temperature = 0.3;
        let agent = Agent::new(agent_spec, runtime.registry()).unwrap();
        let model = ScriptedModel::new(vec![ModelReply::Final("ok".into())]);

        agent
            .execute("t", "the prompt".into(), &model, &runtime, "gpt-3.5-turbo")
            .await
            .unwrap();

        let request = &model.requests()[0];
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.tools.len(), 1);
        assert!(request.messages[0].content.starts_with("You are Researcher. Meticulous."));
        assert!(request.messages[0].content.contains("Your personal goal is: Find facts"));
        assert_eq!(request.messages[1].content, "the prompt");
    }

    #[test]
    fn unregistered_tool_fails_construction() {
        let runtime = ToolRuntime::new(ToolRegistry::new());
        assert!(Agent::new(spec(1), runtime.registry()).is_err());
    }
}
