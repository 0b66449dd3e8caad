use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{CrewError, Result};
use crate::registry::ToolId;

fn default_max_iter() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Overrides the run's model choice for this agent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(default)]
    pub tools: Vec<ToolId>,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    #[serde(default)]
    pub max_rpm: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    pub expected_output: String,
    pub agent: String,
    /// Upstream tasks whose outputs are injected into this task's prompt.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub async_execution: bool,
}

/// A crew declared as data: who the agents are and what they do, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<AgentSpec>,
    pub tasks: Vec<TaskSpec>,
}

impl Blueprint {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            CrewError::InvalidBlueprint(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| CrewError::InvalidBlueprint(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let blueprint: Blueprint = serde_json::from_str(content)
            .map_err(|e| CrewError::InvalidBlueprint(e.to_string()))?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Structural checks: unique ids, known agents, context only pointing
    /// at earlier tasks, and sane limits.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CrewError::InvalidBlueprint(msg));

        if self.tasks.is_empty() {
            return invalid(format!("crew '{}' declares no tasks", self.name));
        }

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return invalid(format!("duplicate agent id '{}'", agent.id));
            }
            if agent.max_iter == 0 {
                return invalid(format!("agent '{}' has max_iter = 0", agent.id));
            }
            if agent.max_rpm == Some(0) {
                return invalid(format!("agent '{}' has max_rpm = 0", agent.id));
            }
        }

        let mut seen_tasks = HashSet::new();
        for task in &self.tasks {
            if !agent_ids.contains(task.agent.as_str()) {
                return invalid(format!("task '{}' references unknown agent '{}'", task.id, task.agent));
            }
            for upstream in &task.context {
                if !seen_tasks.contains(upstream.as_str()) {
                    return invalid(format!(
                        "task '{}' lists '{}' as context, which is not an earlier task",
                        task.id, upstream
                    ));
                }
            }
            if !seen_tasks.insert(task.id.as_str()) {
                return invalid(format!("duplicate task id '{}'", task.id));
            }
        }
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Copy with `{key}` placeholders filled from `inputs`.
    pub fn interpolated(&self, inputs: &HashMap<String, String>) -> Self {
        let fill = |text: &str| interpolate(text, inputs);
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            agents: self
                .agents
                .iter()
                .map(|a| AgentSpec {
                    role: fill(&a.role),
                    goal: fill(&a.goal),
                    backstory: fill(&a.backstory),
                    ..a.clone()
                })
                .collect(),
            tasks: self
                .tasks
                .iter()
                .map(|t| TaskSpec {
                    description: fill(&t.description),
                    expected_output: fill(&t.expected_output),
                    ..t.clone()
                })
                .collect(),
        }
    }
}

/// Replaces `{key}` with the bound value in one left-to-right pass, so
/// substituted text is never scanned again. Unbound placeholders are left as-is.
pub fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let bound = after
            .find('}')
            .and_then(|close| inputs.get(&after[..close]).map(|value| (value, close)));
        match bound {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// All blueprints found in a directory, keyed by crew name.
#[derive(Debug, Clone, Default)]
pub struct BlueprintLibrary {
    crews: BTreeMap<String, Blueprint>,
}

impl BlueprintLibrary {
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            CrewError::InvalidBlueprint(format!("failed to read '{}': {}", dir.display(), e))
        })?;

        let mut library = Self::default();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let blueprint = Blueprint::load(&path).await?;
            if library.crews.contains_key(&blueprint.name) {
                warn!("Crew '{}' defined twice; keeping {}", blueprint.name, path.display());
            }
            info!("Loaded crew '{}' ({} tasks)", blueprint.name, blueprint.tasks.len());
            library.crews.insert(blueprint.name.clone(), blueprint);
        }
        Ok(library)
    }

    pub fn insert(&mut self, blueprint: Blueprint) {
        self.crews.insert(blueprint.name.clone(), blueprint);
    }

    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.crews.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.crews.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.crews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crews.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Blueprint> {
        self.crews.values()
    }
}
