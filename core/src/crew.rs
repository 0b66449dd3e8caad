use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::Agent;
use crate::blueprint::Blueprint;
use crate::error::{CrewError, Result};
use crate::llm::LanguageModel;
use crate::runtime::ToolRuntime;
use crate::task::{task_prompt, TaskOutput};

#[derive(Debug, Clone, Serialize)]
pub struct CrewOutput {
    pub run_id: Uuid,
    pub crew: String,
    /// Output of the last declared task.
    pub final_output: String,
    /// One output per task, in declared order.
    pub tasks: Vec<TaskOutput>,
}

impl CrewOutput {
    /// True if any task stopped at its iteration cap.
    pub fn is_partial(&self) -> bool {
        self.tasks.iter().any(TaskOutput::is_partial)
    }

    pub fn aggregate(&self) -> String {
        self.tasks
            .iter()
            .map(|t| format!("## {} ({})\n\n{}", t.task_id, t.agent_role, t.raw.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Sequential orchestrator for one blueprint.
///
/// Tasks run in declared order and each sees only the outputs of the tasks
/// in its `context`. A task marked `async_execution` is spawned and joined
/// by the first later task that depends on it, or at the end of the run.
pub struct Crew {
    blueprint: Blueprint,
    model: Arc<dyn LanguageModel>,
    runtime: ToolRuntime,
}

impl Crew {
    pub fn new(blueprint: Blueprint, model: Arc<dyn LanguageModel>, runtime: ToolRuntime) -> Result<Self> {
        blueprint.validate()?;
        for agent in &blueprint.agents {
            runtime.registry().definitions_for(&agent.tools).map_err(|e| {
                CrewError::InvalidBlueprint(format!("agent '{}': {}", agent.id, e))
            })?;
        }
        Ok(Self {
            blueprint,
            model,
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.blueprint.name
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub async fn kickoff(&self, inputs: HashMap<String, String>, default_model: &str) -> Result<CrewOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!("crew_run", %run_id, crew = %self.blueprint.name);
        self.run(run_id, inputs, default_model).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, inputs: HashMap<String, String>, default_model: &str) -> Result<CrewOutput> {
        let bound = self.blueprint.interpolated(&inputs);
        info!("Kickoff: {} tasks, model {}", bound.tasks.len(), default_model);

        let mut agents: HashMap<String, Arc<Agent>> = HashMap::new();
        for spec in &bound.agents {
            let agent = Agent::new(spec.clone(), self.runtime.registry())?;
            agents.insert(spec.id.clone(), Arc::new(agent));
        }

        let mut outputs: HashMap<String, TaskOutput> = HashMap::new();
        let mut pending = PendingTasks::default();

        for task in &bound.tasks {
            for upstream in &task.context {
                if let Some(handle) = pending.take(upstream) {
                    outputs.insert(upstream.clone(), join(upstream, handle).await?);
                }
            }

            let prompt = {
                let upstream: Vec<&TaskOutput> =
                    task.context.iter().filter_map(|id| outputs.get(id)).collect();
                task_prompt(task, &upstream)
            };
            let agent = agents.get(&task.agent).cloned().ok_or_else(|| {
                CrewError::InvalidBlueprint(format!("task '{}' has no agent", task.id))
            })?;

            if task.async_execution {
                info!(task = %task.id, agent = %agent.id(), "spawning async task");
                let model = self.model.clone();
                let runtime = self.runtime.clone();
                let task_id = task.id.clone();
                let default_model = default_model.to_string();
                let handle = tokio::spawn(
                    async move {
                        agent
                            .execute(&task_id, prompt, model.as_ref(), &runtime, &default_model)
                            .await
                    }
                    .in_current_span(),
                );
                pending.insert(task.id.clone(), handle);
            } else {
                info!(task = %task.id, agent = %agent.id(), "running task");
                let output = agent
                    .execute(&task.id, prompt, self.model.as_ref(), &self.runtime, default_model)
                    .await?;
                outputs.insert(task.id.clone(), output);
            }
        }

        for task in &bound.tasks {
            if let Some(handle) = pending.take(&task.id) {
                outputs.insert(task.id.clone(), join(&task.id, handle).await?);
            }
        }

        let tasks: Vec<TaskOutput> = bound
            .tasks
            .iter()
            .filter_map(|t| outputs.remove(&t.id))
            .collect();
        let final_output = tasks.last().map(|t| t.raw.clone()).unwrap_or_default();

        info!(partial = tasks.iter().any(TaskOutput::is_partial), "Run finished");
        Ok(CrewOutput {
            run_id,
            crew: bound.name,
            final_output,
            tasks,
        })
    }
}

/// Async tasks spawned but not yet joined. Dropping the set aborts whatever
/// is still in it, so a run that returns early leaves nothing running.
#[derive(Default)]
struct PendingTasks(HashMap<String, JoinHandle<Result<TaskOutput>>>);

impl PendingTasks {
    fn insert(&mut self, task_id: String, handle: JoinHandle<Result<TaskOutput>>) {
        self.0.insert(task_id, handle);
    }

    fn take(&mut self, task_id: &str) -> Option<JoinHandle<Result<TaskOutput>>> {
        self.0.remove(task_id)
    }
}

impl Drop for PendingTasks {
    fn drop(&mut self) {
        for (task_id, handle) in self.0.drain() {
            if !handle.is_finished() {
                warn!(task = %task_id, "aborting async task of an unfinished run");
            }
            handle.abort();
        }
    }
}

async fn join(task_id: &str, handle: JoinHandle<Result<TaskOutput>>) -> Result<TaskOutput> {
    handle
        .await
        .map_err(|e| CrewError::TaskAborted(format!("{task_id}: {e}")))?
}
