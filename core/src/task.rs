use serde::Serialize;

use crate::blueprint::TaskSpec;
use crate::runtime::ToolInvocation;

const CONTEXT_SEPARATOR: &str = "\n\n----------\n\n";

/// How a task's reasoning loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    Completed,
    /// The agent ran out of iterations; `raw` holds the best partial output.
    IterationLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutput {
    pub task_id: String,
    pub agent_role: String,
    pub raw: String,
    pub finish: Finish,
    pub iterations: u32,
    pub tool_calls: Vec<ToolInvocation>,
}

impl TaskOutput {
    pub fn is_partial(&self) -> bool {
        self.finish == Finish::IterationLimit
    }

    pub fn failed_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|c| c.failed).count()
    }
}

/// Builds the working prompt for a task from its (already interpolated)
/// spec and the outputs of its declared upstream tasks, in declared order.
pub fn task_prompt(task: &TaskSpec, upstream: &[&TaskOutput]) -> String {
    let mut prompt = format!(
        "{}\n\nThis is the expected criteria for your final answer: {}\n\
         You MUST return the actual complete content as the final answer, not a summary.",
        task.description.trim(),
        task.expected_output.trim()
    );

    if !upstream.is_empty() {
        let context = upstream
            .iter()
            .map(|output| output.raw.trim())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        prompt.push_str("\n\nThis is the context you're working with:\n");
        prompt.push_str(&context);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TaskSpec {
        TaskSpec {
            id: "edit".into(),
            description: "Edit the draft about X".into(),
            expected_output: "A report".into(),
            agent: "editor".into(),
            context: vec!["research".into()],
            async_execution: false,
        }
    }

    fn output(id: &str, raw: &str) -> TaskOutput {
        TaskOutput {
            task_id: id.into(),
            agent_role: "Researcher".into(),
            raw: raw.into(),
            finish: Finish::Completed,
            iterations: 1,
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn prompt_without_context_has_no_context_section() {
        let prompt = task_prompt(&spec(), &[]);
        assert!(prompt.starts_with("Edit the draft about X"));
        assert!(prompt.contains("expected criteria for your final answer: A report"));
        assert!(!prompt.contains("context you're working with"));
    }

    #[test]
    fn upstream_outputs_are_joined_in_order() {
        let a = output("a", "first");
        let b = output("b", "second");
        let prompt = task_prompt(&spec(), &[&a, &b]);
        let tail = prompt.split("context you're working with:\n").nth(1).unwrap();
        assert_eq!(tail, "first\n\n----------\n\nsecond");
    }
}
