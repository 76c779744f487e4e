//! Process registry and the built-in processes that mutate the task graph
//! in response to process-trigger tool calls (§4.5).

use crate::graph::DependencyGraph;
use crate::ids::IdGenerator;
use crate::store::EntityStore;
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_PROCESS: &str = "neutral_task";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Failure,
}

/// Outcome of running a process. `blocks_parent` tells the caller whether
/// the calling task should move to `WAITING_ON_DEPENDENCIES` (subtasks were
/// registered as dependencies) or stay eligible to run again.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: ProcessOutcome,
    pub new_subtasks: Vec<u64>,
    pub blocks_parent: bool,
    pub message: Option<String>,
}

impl ProcessResult {
    pub fn success(new_subtasks: Vec<u64>, blocks_parent: bool) -> Self {
        Self {
            outcome: ProcessOutcome::Success,
            new_subtasks,
            blocks_parent,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: ProcessOutcome::Failure,
            new_subtasks: Vec::new(),
            blocks_parent: false,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Shared state every built-in process needs to mutate the graph and store.
pub struct ProcessContext {
    pub store: Arc<dyn EntityStore>,
    pub graph: Arc<DependencyGraph>,
    pub ids: Arc<IdGenerator>,
}

#[async_trait]
pub trait Process: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ProcessContext,
        caller: &Task,
    ) -> ProcessResult;
}

/// In-process map `process-name → Process`.
#[derive(Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, Arc<dyn Process>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            processes: HashMap::new(),
        }
    }

    pub fn register(&mut self, process: impl Process + 'static) {
        self.processes.insert(process.name().to_string(), Arc::new(process));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Process>> {
        self.processes.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processes.keys().map(|s| s.as_str()).collect()
    }
}

/// Registers the six mandatory built-in processes.
pub fn create_default_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    registry.register(BreakDownTask);
    registry.register(CreateSubtask);
    registry.register(EndTask);
    registry.register(NeedMoreContext);
    registry.register(NeedMoreTools);
    registry.register(FlagForReview);
    registry
}

async fn spawn_child(
    ctx: &ProcessContext,
    parent: &Task,
    instruction: String,
    process: String,
    metadata: serde_json::Map<String, serde_json::Value>,
) -> crate::error::Result<u64> {
    let id = ctx.ids.next();
    let mut child = Task::new_child(id, parent.tree_id, parent.id, instruction, process);
    for (k, v) in metadata {
        child.metadata.insert(k, v);
    }
    ctx.store.create_task(child).await?;
    ctx.graph.add_task(id).await;
    Ok(id)
}

/// `break_down_task(parent_id, approach)` — splits `approach` into one or
/// more subtask instructions and registers each as a dependency.
pub struct BreakDownTask;

#[async_trait]
impl Process for BreakDownTask {
    fn name(&self) -> &str {
        "break_down_task"
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ProcessContext, caller: &Task) -> ProcessResult {
        let approach = params.get("approach").and_then(|v| v.as_str()).unwrap_or("");
        if approach.trim().is_empty() {
            return ProcessResult::failure("break_down_task requires a non-empty 'approach'");
        }

        let steps: Vec<String> = if let Some(explicit) = params.get("subtasks").and_then(|v| v.as_array()) {
            explicit
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            split_approach_into_steps(approach)
        };

        if steps.is_empty() {
            return ProcessResult::failure("break_down_task could not derive any subtasks from 'approach'");
        }

        let mut new_ids = Vec::with_capacity(steps.len());
        for step in steps {
            match spawn_child(ctx, caller, step, DEFAULT_PROCESS.to_string(), Default::default()).await {
                Ok(id) => {
                    if !ctx.graph.add_edge(caller.id, id).await {
                        return ProcessResult::failure("internal: dependency edge would create a cycle");
                    }
                    new_ids.push(id);
                }
                Err(e) => return ProcessResult::failure(format!("failed to create subtask: {e}")),
            }
        }

        ProcessResult::success(new_ids, true)
    }
}

/// Splits a free-text approach into discrete steps: numbered/bulleted lines
/// first, falling back to sentence splits, falling back to the whole text
/// as a single step.
fn split_approach_into_steps(approach: &str) -> Vec<String> {
    let bullet_lines: Vec<String> = approach
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| {
            l.starts_with('-') || l.starts_with('*') || starts_with_number_dot(l)
        })
        .map(|l| l.trim_start_matches(['-', '*']).trim().to_string())
        .map(|l| strip_leading_number(&l))
        .filter(|l| !l.is_empty())
        .collect();

    if bullet_lines.len() >= 2 {
        return bullet_lines;
    }

    let sentences: Vec<String> = approach
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if sentences.len() >= 2 {
        return sentences;
    }

    vec![approach.trim().to_string()]
}

fn starts_with_number_dot(line: &str) -> bool {
    let mut chars = line.chars();
    let mut saw_digit = false;
    for c in chars.by_ref() {
        if c.is_ascii_digit() {
            saw_digit = true;
        } else {
            return saw_digit && (c == '.' || c == ')');
        }
    }
    false
}

fn strip_leading_number(line: &str) -> String {
    let trimmed = line.trim_start();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end == 0 {
        return trimmed.to_string();
    }
    let rest = &trimmed[digits_end..];
    rest.trim_start_matches(['.', ')']).trim().to_string()
}

/// `create_subtask(parent_id, subtask_instruction, options)` — creates
/// exactly one child, inheriting agent/context per the rules in §4.5.
pub struct CreateSubtask;

#[async_trait]
impl Process for CreateSubtask {
    fn name(&self) -> &str {
        "create_subtask"
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ProcessContext, caller: &Task) -> ProcessResult {
        let instruction = params
            .get("subtask_instruction")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if instruction.is_empty() {
            return ProcessResult::failure("create_subtask requires a non-empty 'subtask_instruction'");
        }

        let process = params
            .get("process")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROCESS)
            .to_string();

        let mut metadata = serde_json::Map::new();
        if let Some(priority) = params.get("priority") {
            metadata.insert("priority".to_string(), priority.clone());
        }
        if let Some(extra) = params.get("metadata").and_then(|v| v.as_object()) {
            for (k, v) in extra {
                metadata.insert(k.clone(), v.clone());
            }
        }

        let assigned_agent = params.get("assigned_agent").and_then(|v| v.as_str());
        if assigned_agent.is_none() {
            if let Some(parent_agent) = &caller.agent {
                metadata.insert(
                    "parent_agent".to_string(),
                    serde_json::Value::String(parent_agent.clone()),
                );
            }
        } else if let Some(agent) = assigned_agent {
            metadata.insert("assigned_agent".to_string(), serde_json::Value::String(agent.to_string()));
        }

        let explicit_context: Vec<String> = params
            .get("additional_context")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default();

        let additional_context = if explicit_context.is_empty() {
            carry_over_context(ctx, caller, instruction).await
        } else {
            explicit_context
        };
        if !additional_context.is_empty() {
            metadata.insert(
                "additional_context".to_string(),
                serde_json::Value::Array(
                    additional_context.into_iter().map(serde_json::Value::String).collect(),
                ),
            );
        }

        if let Some(tools) = params.get("additional_tools").and_then(|v| v.as_array()) {
            metadata.insert("additional_tools".to_string(), serde_json::Value::Array(tools.clone()));
        }

        let id = match spawn_child(ctx, caller, instruction.to_string(), process, metadata).await {
            Ok(id) => id,
            Err(e) => return ProcessResult::failure(format!("failed to create subtask: {e}")),
        };

        if !ctx.graph.add_edge(caller.id, id).await {
            return ProcessResult::failure("internal: dependency edge would create a cycle");
        }

        ProcessResult::success(vec![id], true)
    }
}

/// Carries over up to 3 of the parent's context documents whose names match
/// the "general pattern" filter, or share a nontrivial word with the new
/// subtask's instruction.
async fn carry_over_context(ctx: &ProcessContext, caller: &Task, subtask_instruction: &str) -> Vec<String> {
    const PATTERN_WORDS: &[&str] = &["guide", "pattern", "standard", "reference"];
    let parent_docs: Vec<String> = caller
        .metadata
        .get("additional_context")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    if parent_docs.is_empty() {
        return Vec::new();
    }

    let instruction_words: Vec<String> = subtask_instruction
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 3)
        .collect();

    let docs = ctx.store.get_context_documents(&parent_docs).await.unwrap_or_default();

    docs.into_iter()
        .filter(|doc| {
            let name_lower = doc.name.to_lowercase();
            PATTERN_WORDS.iter().any(|p| name_lower.contains(p))
                || instruction_words.iter().any(|w| name_lower.contains(w.as_str()))
        })
        .map(|doc| doc.name)
        .take(3)
        .collect()
}

/// `end_task(task_id, result)` — the explicit completion signal. Validates
/// the call; the actual `CompleteTask` transition is driven by the runtime
/// engine observing this process's success outcome.
pub struct EndTask;

#[async_trait]
impl Process for EndTask {
    fn name(&self) -> &str {
        "end_task"
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ProcessContext, _caller: &Task) -> ProcessResult {
        if params.get("result").is_none() {
            return ProcessResult::failure("end_task requires a 'result' field");
        }
        ProcessResult::success(Vec::new(), false)
    }
}

const INVESTIGATION_KEYWORDS: &[&str] = &[
    "research",
    "investigate",
    "explore",
    "find out",
    "discover",
    "analyze",
];

/// `need_more_context(requesting_task_id, request, justification)`.
pub struct NeedMoreContext;

#[async_trait]
impl Process for NeedMoreContext {
    fn name(&self) -> &str {
        "need_more_context"
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ProcessContext, caller: &Task) -> ProcessResult {
        let request = params.get("request").and_then(|v| v.as_str()).unwrap_or("").trim();
        let justification = params
            .get("justification")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();

        let existing_docs = caller
            .metadata
            .get("additional_context")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);

        if existing_docs > 10 {
            return ProcessResult::success(Vec::new(), false)
                .with_message("Request denied: task already has more than 10 context documents.");
        }
        if request.split_whitespace().count() < 5 {
            return ProcessResult::success(Vec::new(), false)
                .with_message("Request denied: context request must be at least 5 words.");
        }
        if justification.split_whitespace().count() < 3 {
            return ProcessResult::success(Vec::new(), false)
                .with_message("Request denied: justification is too thin.");
        }

        let mut ids = Vec::new();
        match spawn_child(
            ctx,
            caller,
            format!("Provide context for: {request}"),
            DEFAULT_PROCESS.to_string(),
            Default::default(),
        )
        .await
        {
            Ok(id) => {
                ctx.graph.add_edge(caller.id, id).await;
                ids.push(id);
            }
            Err(e) => return ProcessResult::failure(format!("failed to spawn context subtask: {e}")),
        }

        let lower = request.to_lowercase();
        if INVESTIGATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            match spawn_child(
                ctx,
                caller,
                format!("Investigate: {request}"),
                DEFAULT_PROCESS.to_string(),
                Default::default(),
            )
            .await
            {
                Ok(id) => {
                    ctx.graph.add_edge(caller.id, id).await;
                    ids.push(id);
                }
                Err(e) => return ProcessResult::failure(format!("failed to spawn investigation subtask: {e}")),
            }
        }

        ProcessResult::success(ids, true)
    }
}

/// `need_more_tools(requesting_task_id, tool_request, justification)`.
/// Spawns evaluation/validation subtasks the parent does *not* wait on
/// (§9 open question, resolved as a fixed policy).
pub struct NeedMoreTools;

#[async_trait]
impl Process for NeedMoreTools {
    fn name(&self) -> &str {
        "need_more_tools"
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ProcessContext, caller: &Task) -> ProcessResult {
        let tool_request = params.get("tool_request").and_then(|v| v.as_str()).unwrap_or("").trim();
        if tool_request.is_empty() {
            return ProcessResult::failure("need_more_tools requires a non-empty 'tool_request'");
        }

        let mut ids = Vec::new();
        for label in ["Evaluate tool request", "Validate tool request"] {
            match spawn_child(
                ctx,
                caller,
                format!("{label}: {tool_request}"),
                DEFAULT_PROCESS.to_string(),
                Default::default(),
            )
            .await
            {
                Ok(id) => ids.push(id),
                Err(e) => return ProcessResult::failure(format!("failed to spawn subtask: {e}")),
            }
        }

        // Deliberately not added as dependencies — the caller keeps running.
        ProcessResult::success(ids, false)
    }
}

/// `flag_for_review(flagging_task_id, reason, severity)`.
pub struct FlagForReview;

#[async_trait]
impl Process for FlagForReview {
    fn name(&self) -> &str {
        "flag_for_review"
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ProcessContext, caller: &Task) -> ProcessResult {
        let reason = params.get("reason").and_then(|v| v.as_str()).unwrap_or("").trim();
        if reason.is_empty() {
            return ProcessResult::failure("flag_for_review requires a non-empty 'reason'");
        }
        let severity = params.get("severity").and_then(|v| v.as_str()).unwrap_or("info");

        let mut metadata = serde_json::Map::new();
        metadata.insert("severity".to_string(), serde_json::Value::String(severity.to_string()));

        let id = match spawn_child(
            ctx,
            caller,
            format!("Review flagged task {}: {reason}", caller.id),
            DEFAULT_PROCESS.to_string(),
            metadata,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => return ProcessResult::failure(format!("failed to spawn review subtask: {e}")),
        };

        ProcessResult::success(vec![id], false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store_for_tests;

    fn ctx() -> (ProcessContext, Arc<crate::store::test_support::MemoryTestStore>) {
        let store = memory_store_for_tests();
        let graph = Arc::new(DependencyGraph::new());
        let ids = Arc::new(IdGenerator::new());
        (
            ProcessContext {
                store: store.clone(),
                graph,
                ids,
            },
            store,
        )
    }

    #[tokio::test]
    async fn break_down_task_creates_dependencies() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "two step task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();
        ctx.graph.add_task(parent.id).await;

        let registry = create_default_registry();
        let process = registry.get("break_down_task").unwrap();
        let result = process
            .execute(
                serde_json::json!({ "approach": "Split into A and B", "subtasks": ["Do A", "Do B"] }),
                &ctx,
                &parent,
            )
            .await;

        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert_eq!(result.new_subtasks.len(), 2);
        assert!(result.blocks_parent);
        assert!(!ctx.graph.all_dependencies_resolved(parent.id).await);
    }

    #[tokio::test]
    async fn break_down_task_rejects_empty_approach() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("break_down_task").unwrap();
        let result = process.execute(serde_json::json!({ "approach": "" }), &ctx, &parent).await;
        assert_eq!(result.outcome, ProcessOutcome::Failure);
    }

    #[tokio::test]
    async fn create_subtask_inherits_parent_agent() {
        let (ctx, store) = ctx();
        let mut parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        parent.agent = Some("planner".into());
        store.create_task(parent.clone()).await.unwrap();
        ctx.graph.add_task(parent.id).await;

        let registry = create_default_registry();
        let process = registry.get("create_subtask").unwrap();
        let result = process
            .execute(
                serde_json::json!({ "subtask_instruction": "Do the thing" }),
                &ctx,
                &parent,
            )
            .await;

        assert_eq!(result.outcome, ProcessOutcome::Success);
        let child_id = result.new_subtasks[0];
        let child = store.get_task(child_id).await.unwrap();
        assert_eq!(
            child.metadata.get("parent_agent").and_then(|v| v.as_str()),
            Some("planner")
        );
    }

    #[tokio::test]
    async fn need_more_context_rejects_short_request() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("need_more_context").unwrap();
        let result = process
            .execute(
                serde_json::json!({ "request": "too short", "justification": "because I said so" }),
                &ctx,
                &parent,
            )
            .await;
        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert!(!result.blocks_parent);
        assert!(result.message.unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn need_more_context_spawns_investigation_subtask_on_keyword() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("need_more_context").unwrap();
        let result = process
            .execute(
                serde_json::json!({
                    "request": "please investigate the upstream vendor API rate limits",
                    "justification": "we keep hitting 429s in production"
                }),
                &ctx,
                &parent,
            )
            .await;
        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert!(result.blocks_parent);
        assert_eq!(result.new_subtasks.len(), 2);
    }

    #[tokio::test]
    async fn need_more_tools_does_not_block_parent() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("need_more_tools").unwrap();
        let result = process
            .execute(serde_json::json!({ "tool_request": "a web search tool" }), &ctx, &parent)
            .await;
        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert!(!result.blocks_parent);
        assert_eq!(result.new_subtasks.len(), 2);
    }

    #[tokio::test]
    async fn flag_for_review_does_not_block_flagging_task() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("flag_for_review").unwrap();
        let result = process
            .execute(
                serde_json::json!({ "reason": "suspicious output", "severity": "high" }),
                &ctx,
                &parent,
            )
            .await;
        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert!(!result.blocks_parent);
    }

    #[tokio::test]
    async fn end_task_requires_result() {
        let (ctx, store) = ctx();
        let parent = Task::new_root(ctx.ids.next(), "task".into(), DEFAULT_PROCESS.into());
        store.create_task(parent.clone()).await.unwrap();

        let registry = create_default_registry();
        let process = registry.get("end_task").unwrap();
        let rejected = process.execute(serde_json::json!({}), &ctx, &parent).await;
        assert_eq!(rejected.outcome, ProcessOutcome::Failure);

        let accepted = process
            .execute(serde_json::json!({ "result": { "summary": "done" } }), &ctx, &parent)
            .await;
        assert_eq!(accepted.outcome, ProcessOutcome::Success);
    }
}
