//! Tool handler registry (component J).
//!
//! A name-keyed, read-mostly map of tool handlers that rejects duplicate
//! names at registration time, with one reserved name: `output_plan` cannot
//! be registered by an extension handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::EngineError;

/// Name reserved for the built-in plan-finalizing tool; extensions cannot
/// register a handler under this name (invariant 9).
pub const OUTPUT_PLAN_TOOL_NAME: &str = "output_plan";

/// What a tool handler returns to the coordinator: a JSON artifact merged
/// into the `center.tool_call` trace, and an optional directive telling the
/// engine to finalize the session with the given plan text.
pub struct ToolOutcome {
    pub artifact: Value,
    pub finalize_with_plan: Option<String>,
}

impl ToolOutcome {
    pub fn artifact(artifact: Value) -> Self {
        Self { artifact, finalize_with_plan: None }
    }

    pub fn finalize(plan_text: impl Into<String>, artifact: Value) -> Self {
        Self { artifact, finalize_with_plan: Some(plan_text.into()) }
    }
}

/// A named tool invoked by the center coordinator loop. `handle` receives
/// the raw JSON arguments the platform LLM supplied; the engine itself
/// mediates session mutation (e.g. `output_plan` finalizing the session is
/// signalled via `ToolOutcome::finalize_with_plan`, applied by the engine,
/// not by the handler reaching into the session directly) — the session is
/// mutated only by the coordinator, never by a handler.
#[async_trait]
pub trait CenterToolHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, arguments: Value) -> Result<ToolOutcome, String>;
}

struct OutputPlanHandler;

#[async_trait]
impl CenterToolHandler for OutputPlanHandler {
    fn name(&self) -> &str {
        OUTPUT_PLAN_TOOL_NAME
    }

    async fn handle(&self, arguments: Value) -> Result<ToolOutcome, String> {
        let plan_text = arguments
            .get("plan_text")
            .and_then(Value::as_str)
            .ok_or_else(|| "output_plan requires a string 'plan_text'".to_string())?
            .to_string();
        Ok(ToolOutcome::finalize(plan_text.clone(), Value::String(plan_text)))
    }
}

/// Name → handler table. Built at engine-construction time and frozen for
/// the lifetime of the engine (read-only after construction).
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn CenterToolHandler>>,
}

impl ToolRegistry {
    /// A registry containing only the always-present `output_plan` handler.
    /// `ask_agent` and `spawn_sub_negotiation` are wired in by the engine
    /// itself at build time (they need access to the `AgentRegistry` and to
    /// the engine's own recursive `start_negotiation`, which a
    /// free-standing `CenterToolHandler` cannot reach).
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Arc<dyn CenterToolHandler>> = HashMap::new();
        handlers.insert(OUTPUT_PLAN_TOOL_NAME.to_string(), Arc::new(OutputPlanHandler));
        Self { handlers }
    }

    /// Registers an extension handler. Rejects the reserved `output_plan`
    /// name and duplicate names.
    pub fn register(&mut self, handler: Arc<dyn CenterToolHandler>) -> Result<(), EngineError> {
        let name = handler.name().to_string();
        if name == OUTPUT_PLAN_TOOL_NAME {
            return Err(EngineError::ReservedToolName(name));
        }
        if self.handlers.contains_key(&name) {
            return Err(EngineError::DuplicateToolName(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CenterToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
