//! Adapter (component D): per-agent client-side LLM channel, plus the
//! `AgentRegistry` that routes agent ids to their owning adapter.
//!
//! One provider per adapter instance; streaming defaults to a single-chunk
//! wrapper around the one-shot call so a provider only has to implement
//! `chat` to get a working `chat_stream` for free.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::errors::AdapterError;

/// A chat turn sent to or received from an agent's underlying model.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// A finite, single-consumer, non-restartable sequence of text chunks. A
/// stream may end with an `Err` after already yielding chunks — callers must
/// treat everything consumed before the error as valid partial output.
pub type ChatChunkStream = Pin<Box<dyn Stream<Item = Result<String, AdapterError>> + Send>>;

/// A structured profile payload for an agent, as returned by
/// [`Adapter::get_profile`]. Provider-shaped; downstream code (skills)
/// interprets the fields it needs.
pub type ProfileMap = HashMap<String, Value>;

/// A client-side LLM channel for a single provider. One adapter instance
/// typically serves many agents (`agent_id` selects which).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns a structured profile for `agent_id`. Must not fail on unknown
    /// agents: returns a minimal `{"agent_id": ...}` map in that case.
    async fn get_profile(&self, agent_id: &str) -> ProfileMap;

    /// One-shot chat request. Fails with [`AdapterError`] on provider
    /// failure.
    async fn chat(
        &self,
        agent_id: &str,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> Result<String, AdapterError>;

    /// Streaming chat. Default implementation wraps [`Self::chat`] as a
    /// single-chunk stream; providers with real token streaming override
    /// this.
    async fn chat_stream(
        &self,
        agent_id: &str,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> Result<ChatChunkStream, AdapterError> {
        let text = self.chat(agent_id, messages, system_prompt).await?;
        Ok(Box::pin(futures_util::stream::once(async move { Ok(text) })))
    }
}

fn minimal_fallback_profile(agent_id: &str) -> ProfileMap {
    let mut m = ProfileMap::new();
    m.insert("agent_id".to_string(), Value::String(agent_id.to_string()));
    m
}

/// One entry in the registry: which adapter owns an agent, plus the
/// metadata needed for matching and display.
pub struct RegisteredAgent {
    pub adapter: std::sync::Arc<dyn Adapter>,
    pub source: Option<String>,
    pub scene_tags: std::collections::HashSet<String>,
    pub profile_text: String,
    pub display_name: String,
}

/// Maps `agent_id -> (adapter, source, scene_set, profile_payload,
/// display_name)`. Read-mostly: write operations are guarded by a mutex;
/// readers sample `all_agent_ids` once per engine invocation.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Mutex::new(HashMap::new()) }
    }

    pub fn register_source(&self, agent_id: impl Into<String>, agent: RegisteredAgent) {
        self.agents.lock().unwrap().insert(agent_id.into(), agent);
    }

    pub fn unregister_agent(&self, agent_id: &str) {
        self.agents.lock().unwrap().remove(agent_id);
    }

    /// Routes `get_profile` to the registered adapter for `agent_id`;
    /// unknown agents get a minimal fallback profile rather than an error.
    pub async fn get_profile(&self, agent_id: &str) -> ProfileMap {
        let adapter = {
            let guard = self.agents.lock().unwrap();
            guard.get(agent_id).map(|a| a.adapter.clone())
        };
        match adapter {
            Some(adapter) => adapter.get_profile(agent_id).await,
            None => minimal_fallback_profile(agent_id),
        }
    }

    pub fn adapter_for(&self, agent_id: &str) -> Option<std::sync::Arc<dyn Adapter>> {
        self.agents.lock().unwrap().get(agent_id).map(|a| a.adapter.clone())
    }

    pub fn display_name(&self, agent_id: &str) -> String {
        self.agents
            .lock()
            .unwrap()
            .get(agent_id)
            .map(|a| a.display_name.clone())
            .unwrap_or_else(|| agent_id.to_string())
    }

    pub fn profile_text(&self, agent_id: &str) -> Option<String> {
        self.agents.lock().unwrap().get(agent_id).map(|a| a.profile_text.clone())
    }

    /// Resolves a scope string to a snapshot of matching agent ids. `"all"`
    /// and `"network"` are treated as synonyms for "every registered agent"
    /// (see DESIGN.md for why); `"scene:X"` selects agents tagged with scene
    /// `X`.
    pub fn resolve_scope(&self, scope: &str) -> Vec<String> {
        let guard = self.agents.lock().unwrap();
        if scope == "all" || scope == "network" {
            return guard.keys().cloned().collect();
        }
        if let Some(scene) = scope.strip_prefix("scene:") {
            return guard
                .iter()
                .filter(|(_, a)| a.scene_tags.contains(scene))
                .map(|(id, _)| id.clone())
                .collect();
        }
        Vec::new()
    }

    pub fn all_agent_ids(&self) -> Vec<String> {
        self.agents.lock().unwrap().keys().cloned().collect()
    }
}
