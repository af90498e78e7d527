//! Session and data model (component H): entities, the state machine, and
//! the invariants governing how a negotiation session moves through it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default policy constants (mirrored by `EngineConfig`'s `Default` impl).
pub const DEFAULT_MAX_CENTER_ROUNDS: u32 = 5;
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 1;

/// Stable agent identity: opaque id, display name, optional scene tags and
/// source label (which adapter owns it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    pub scene_tags: HashSet<String>,
    pub source: Option<String>,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            scene_tags: HashSet::new(),
            source: None,
        }
    }
}

/// The demand as submitted, and as rewritten by the formulation skill.
/// `formulated_text` is written exactly once, at the formulation→confirmation
/// boundary (invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandSnapshot {
    pub raw_intent: String,
    pub formulated_text: Option<String>,
    pub user_id: String,
    pub scene_id: String,
}

impl DemandSnapshot {
    pub fn new(raw_intent: impl Into<String>, user_id: impl Into<String>, scene_id: impl Into<String>) -> Self {
        Self {
            raw_intent: raw_intent.into(),
            formulated_text: None,
            user_id: user_id.into(),
            scene_id: scene_id.into(),
        }
    }
}

/// A participant's structured response to the formulated demand. Immutable
/// once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub agent_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-session participant lifecycle: an agent moves through these states
/// independently of the session's own state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantState {
    Invited,
    Active,
    Replied,
    Exited,
    Failed,
}

/// A candidate agent invited into one negotiation. Owned by exactly one
/// session; never reappears once it reaches a terminal per-session state
/// (EXITED, FAILED — REPLIED is not terminal but also never regresses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParticipant {
    pub identity: AgentIdentity,
    pub state: ParticipantState,
    pub offer: Option<Offer>,
    pub resonance_score: f32,
    pub last_error: Option<String>,
}

impl AgentParticipant {
    pub fn new(identity: AgentIdentity, resonance_score: f32) -> Self {
        Self {
            identity,
            state: ParticipantState::Invited,
            offer: None,
            resonance_score,
            last_error: None,
        }
    }
}

/// One append-only record of a coarse engine step, for observability and
/// for diagnosing degenerate outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: String,
    pub input_summary: String,
    pub output_summary: String,
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn new(step: impl Into<String>, input_summary: impl Into<String>, output_summary: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            input_summary: input_summary.into(),
            output_summary: output_summary.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The ten-state negotiation lifecycle. `CREATED` is initial;
/// `COMPLETED`/`CANCELLED`/`FAILED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    Created,
    Formulating,
    Formulated,
    AwaitingConfirmation,
    Matching,
    Offering,
    Synthesizing,
    Completed,
    Cancelled,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NegotiationState::Completed | NegotiationState::Cancelled | NegotiationState::Failed
        )
    }

    /// Permitted successor states in the forward lifecycle, plus `cancel()`
    /// (any non-terminal state → CANCELLED) and the FAILED escape hatch
    /// available from any non-terminal state on a session-scoped failure.
    pub fn can_transition_to(self, next: NegotiationState) -> bool {
        use NegotiationState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled || next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Created, Formulating)
                | (Created, AwaitingConfirmation)
                | (Formulating, Formulated)
                | (Formulating, AwaitingConfirmation)
                | (Formulated, AwaitingConfirmation)
                | (AwaitingConfirmation, Matching)
                | (AwaitingConfirmation, Completed)
                | (Matching, Offering)
                | (Offering, Synthesizing)
                | (Offering, Completed)
                | (Synthesizing, Completed)
        )
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NegotiationState::Created => "CREATED",
            NegotiationState::Formulating => "FORMULATING",
            NegotiationState::Formulated => "FORMULATED",
            NegotiationState::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            NegotiationState::Matching => "MATCHING",
            NegotiationState::Offering => "OFFERING",
            NegotiationState::Synthesizing => "SYNTHESIZING",
            NegotiationState::Completed => "COMPLETED",
            NegotiationState::Cancelled => "CANCELLED",
            NegotiationState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Diagnostic markers used as `plan_output` content when no real plan was
/// synthesized (see DESIGN.md for the reasoning behind these two cases).
pub const DIAGNOSTIC_NO_OFFERS: &str = "(no offers)";
pub const DIAGNOSTIC_MAX_ROUNDS: &str = "(max-rounds reached)";

/// One invocation of the engine against a demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub negotiation_id: String,
    pub demand: DemandSnapshot,
    pub state: NegotiationState,
    pub participants: Vec<AgentParticipant>,
    pub center_rounds: u32,
    pub plan_output: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub max_center_rounds: u32,
    pub parent_negotiation_id: Option<String>,
    pub recursion_depth: u32,
}

impl NegotiationSession {
    pub fn new(negotiation_id: impl Into<String>, demand: DemandSnapshot) -> Self {
        Self {
            negotiation_id: negotiation_id.into(),
            demand,
            state: NegotiationState::Created,
            participants: Vec::new(),
            center_rounds: 0,
            plan_output: None,
            trace: Vec::new(),
            max_center_rounds: DEFAULT_MAX_CENTER_ROUNDS,
            parent_negotiation_id: None,
            recursion_depth: 0,
        }
    }

    /// Convenience constructor generating a fresh opaque id via
    /// `uuid::Uuid::new_v4()`. `negotiation_id` is treated as opaque
    /// throughout this crate; callers are never required to mint their own.
    pub fn new_with_generated_id(demand: DemandSnapshot) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), demand)
    }

    pub fn child_for_sub_negotiation(
        &self,
        negotiation_id: impl Into<String>,
        demand: DemandSnapshot,
    ) -> Self {
        let mut child = Self::new(negotiation_id, demand);
        child.parent_negotiation_id = Some(self.negotiation_id.clone());
        child.recursion_depth = self.recursion_depth + 1;
        child.max_center_rounds = self.max_center_rounds;
        child
    }

    /// Invariant 1: only move through a permitted transition.
    pub fn transition_to(&mut self, next: NegotiationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Invariant 6: true iff every participant is in a barrier-terminal
    /// per-session state. Vacuously true with zero participants.
    pub fn barrier_satisfied(&self) -> bool {
        self.participants.iter().all(|p| {
            matches!(
                p.state,
                ParticipantState::Replied | ParticipantState::Exited | ParticipantState::Failed
            )
        })
    }

    /// Invariant 4: each agent_id appears at most once.
    pub fn has_participant(&self, agent_id: &str) -> bool {
        self.participants.iter().any(|p| p.identity.agent_id == agent_id)
    }

    pub fn participant_mut(&mut self, agent_id: &str) -> Option<&mut AgentParticipant> {
        self.participants.iter_mut().find(|p| p.identity.agent_id == agent_id)
    }

    pub fn participant(&self, agent_id: &str) -> Option<&AgentParticipant> {
        self.participants.iter().find(|p| p.identity.agent_id == agent_id)
    }

    pub fn push_trace(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    pub fn offers_received(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.state == ParticipantState::Replied)
            .count()
    }

    pub fn exited_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| matches!(p.state, ParticipantState::Exited | ParticipantState::Failed))
            .count()
    }
}
