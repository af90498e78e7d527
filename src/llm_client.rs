//! Platform LLM client (component E): the engine's own LLM calls (center,
//! sub-negotiation, gap-recursion), distinct from per-agent adapters.
//!
//! Responses are normalized to a `{content, tool_calls, stop_reason}` shape
//! regardless of provider, so the center loop never has to branch on which
//! platform model answered.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::LLMError;

/// A tool descriptor offered to the platform LLM on a given call.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One role/content turn in the transcript sent to the platform LLM.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// A structured request from the platform LLM to execute a named handler.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The platform LLM's response to a single `chat` call: free text, and/or
/// an ordered list of tool invocations. The provider may return both, or
/// neither (e.g. a refusal).
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: String,
}

/// A single LLM call supporting structured tool-use. Fails with
/// [`LLMError`] on transport or API error; the engine retries once at the
/// center layer before treating a second failure as fatal to the session.
#[async_trait]
pub trait PlatformLlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LLMError>;
}
