//! Skills (component F): pluggable, opaque strategy handlers invoked by the
//! engine with a typed context. Skills are the primary extension seam — they
//! receive a context and return a value, never touching shared engine state
//! directly.

use async_trait::async_trait;
use serde_json::Value;

use std::sync::Arc;

use crate::adapter::{Adapter, ProfileMap};
use crate::errors::SkillError;
use crate::llm_client::ToolCall;
use crate::model::{AgentIdentity, NegotiationSession, Offer};

/// Input to the `formulation` skill.
pub struct FormulationContext<'a> {
    pub raw_intent: &'a str,
    pub user_id: &'a str,
    pub scene_id: &'a str,
}

/// Output of the `formulation` skill.
pub struct FormulationResult {
    pub formulated_text: String,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

/// Rewrites a raw user intent into a clearer demand statement.
#[async_trait]
pub trait FormulationSkill: Send + Sync {
    async fn execute(&self, ctx: FormulationContext<'_>) -> Result<FormulationResult, SkillError>;
}

/// Output of the `offer` skill.
pub struct OfferResult {
    pub content: String,
}

/// Produces one participant's offer in response to the formulated demand.
/// Receives the adapter bound to this participant's `agent_id` as its
/// per-agent chat channel.
#[async_trait]
pub trait OfferSkill: Send + Sync {
    async fn execute(
        &self,
        identity: &AgentIdentity,
        profile: &ProfileMap,
        formulated_demand: &str,
        adapter: &Arc<dyn Adapter>,
    ) -> Result<OfferResult, SkillError>;
}

/// Input to the `center` skill: the running transcript context for one
/// coordinator round.
pub struct CenterContext<'a> {
    pub formulated_demand: &'a str,
    pub participant_profiles: &'a [(AgentIdentity, Option<Offer>)],
    pub tool_call_history: &'a [ToolCall],
    pub round_number: u32,
    pub round_cap: u32,
}

/// Output of the `center` skill: zero or more tool calls, and optional free
/// text (used when synthesizing the final plan directly rather than via the
/// `output_plan` tool).
pub struct CenterResult {
    pub tool_calls: Vec<ToolCall>,
    pub content: Option<String>,
}

/// One round of the bounded coordinator loop: consult the platform LLM with
/// the current transcript and tool schema.
#[async_trait]
pub trait CenterSkill: Send + Sync {
    async fn execute(&self, ctx: CenterContext<'_>) -> Result<CenterResult, SkillError>;
}

/// Input to the `sub_negotiation` skill.
pub struct SubNegotiationContext<'a> {
    pub parent: &'a NegotiationSession,
    pub gap_spec: &'a Value,
}

/// Output of the `sub_negotiation` skill: a seed for the child session, or
/// `None` if the gap does not warrant spawning one.
pub struct SubNegotiationResult {
    pub sub_demand_text: String,
    pub agent_ids: Vec<String>,
}

/// Decides whether and how to spawn a nested negotiation to address a gap
/// identified by the center coordinator.
#[async_trait]
pub trait SubNegotiationSkill: Send + Sync {
    async fn execute(&self, ctx: SubNegotiationContext<'_>) -> Result<Option<SubNegotiationResult>, SkillError>;
}

/// Input to the `gap_recursion` skill.
pub struct GapRecursionContext<'a> {
    pub plan: &'a str,
    pub participants: &'a [AgentIdentity],
    pub recursion_depth: u32,
}

/// Decomposes a synthesized plan into gaps suitable for sub-negotiation
/// seeding.
#[async_trait]
pub trait GapRecursionSkill: Send + Sync {
    async fn execute(&self, ctx: GapRecursionContext<'_>) -> Result<Vec<Value>, SkillError>;
}
