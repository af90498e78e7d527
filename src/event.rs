//! Event pusher (component G): transport-agnostic sink for ordered
//! negotiation events.
//!
//! Named per-negotiation channel semantics (`push`/`push_many`), with
//! default no-op and logging implementations shipped alongside the trait so
//! callers that don't care about transport don't have to write one.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// The finite set of event types emitted by the engine. `event_type`
/// field values on the wire are exactly the dotted names in each variant's
/// doc comment — external consumers parse on that string.
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// `formulation.ready`
    FormulationReady {
        negotiation_id: String,
        raw_intent: String,
        formulated_text: String,
        degraded: bool,
        degraded_reason: Option<String>,
    },
    /// `resonance.activated`
    ResonanceActivated {
        negotiation_id: String,
        activated_count: usize,
        agents: Vec<(String, f32)>,
    },
    /// `offer.received`
    OfferReceived {
        negotiation_id: String,
        agent_id: String,
        display_name: String,
        content: String,
    },
    /// `barrier.complete`
    BarrierComplete {
        negotiation_id: String,
        total_participants: usize,
        offers_received: usize,
        exited_count: usize,
    },
    /// `center.tool_call`
    CenterToolCall {
        negotiation_id: String,
        tool_name: String,
        arguments: Value,
        round_number: u32,
    },
    /// `plan.ready`
    PlanReady {
        negotiation_id: String,
        plan_text: String,
        center_rounds: u32,
        participant_ids: Vec<String>,
    },
    /// `sub_negotiation.started`
    SubNegotiationStarted {
        negotiation_id: String,
        sub_negotiation_id: String,
        sub_demand_text: String,
    },
}

impl NegotiationEvent {
    pub fn negotiation_id(&self) -> &str {
        match self {
            NegotiationEvent::FormulationReady { negotiation_id, .. }
            | NegotiationEvent::ResonanceActivated { negotiation_id, .. }
            | NegotiationEvent::OfferReceived { negotiation_id, .. }
            | NegotiationEvent::BarrierComplete { negotiation_id, .. }
            | NegotiationEvent::CenterToolCall { negotiation_id, .. }
            | NegotiationEvent::PlanReady { negotiation_id, .. }
            | NegotiationEvent::SubNegotiationStarted { negotiation_id, .. } => negotiation_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            NegotiationEvent::FormulationReady { .. } => "formulation.ready",
            NegotiationEvent::ResonanceActivated { .. } => "resonance.activated",
            NegotiationEvent::OfferReceived { .. } => "offer.received",
            NegotiationEvent::BarrierComplete { .. } => "barrier.complete",
            NegotiationEvent::CenterToolCall { .. } => "center.tool_call",
            NegotiationEvent::PlanReady { .. } => "plan.ready",
            NegotiationEvent::SubNegotiationStarted { .. } => "sub_negotiation.started",
        }
    }

    /// The bit-exact wire shape: `{event_type, negotiation_id,
    /// timestamp, data}`.
    pub fn to_wire(&self) -> Value {
        #[derive(Serialize)]
        struct Wire {
            event_type: &'static str,
            negotiation_id: String,
            timestamp: f64,
            data: Value,
        }

        let data = match self {
            NegotiationEvent::FormulationReady {
                raw_intent,
                formulated_text,
                degraded,
                degraded_reason,
                ..
            } => json!({
                "raw_intent": raw_intent,
                "formulated_text": formulated_text,
                "degraded": degraded,
                "degraded_reason": degraded_reason,
            }),
            NegotiationEvent::ResonanceActivated { activated_count, agents, .. } => json!({
                "activated_count": activated_count,
                "agents": agents.iter().map(|(id, score)| json!({"agent_id": id, "score": score})).collect::<Vec<_>>(),
            }),
            NegotiationEvent::OfferReceived { agent_id, display_name, content, .. } => json!({
                "agent_id": agent_id,
                "display_name": display_name,
                "content": content,
            }),
            NegotiationEvent::BarrierComplete { total_participants, offers_received, exited_count, .. } => json!({
                "total_participants": total_participants,
                "offers_received": offers_received,
                "exited_count": exited_count,
            }),
            NegotiationEvent::CenterToolCall { tool_name, arguments, round_number, .. } => json!({
                "tool_name": tool_name,
                "arguments": arguments,
                "round_number": round_number,
            }),
            NegotiationEvent::PlanReady { plan_text, center_rounds, participant_ids, .. } => json!({
                "plan_text": plan_text,
                "center_rounds": center_rounds,
                "participant_ids": participant_ids,
            }),
            NegotiationEvent::SubNegotiationStarted { sub_negotiation_id, sub_demand_text, .. } => json!({
                "sub_negotiation_id": sub_negotiation_id,
                "sub_demand_text": sub_demand_text,
            }),
        };

        serde_json::to_value(Wire {
            event_type: self.event_type(),
            negotiation_id: self.negotiation_id().to_string(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            data,
        })
        .expect("NegotiationEvent wire shape is always serializable")
    }
}

/// Transport-agnostic sink for ordered negotiation events. Delivery is
/// at-most-once; the engine does not retry. Implementations must preserve
/// call order per negotiation; the coordinator already serializes its own
/// calls, so a conforming implementation need not add its own locking
/// beyond what `push`/`push_many` already require of a single caller.
#[async_trait]
pub trait EventPusher: Send + Sync {
    async fn push(&self, event: NegotiationEvent);

    /// Default implementation pushes sequentially, preserving order.
    async fn push_many(&self, events: Vec<NegotiationEvent>) {
        for event in events {
            self.push(event).await;
        }
    }
}

/// Discards every event. The engine's default when no pusher is supplied.
pub struct NullEventPusher;

#[async_trait]
impl EventPusher for NullEventPusher {
    async fn push(&self, _event: NegotiationEvent) {}
}

/// Logs every event at `info` level via the `log` facade.
pub struct LoggingEventPusher;

#[async_trait]
impl EventPusher for LoggingEventPusher {
    async fn push(&self, event: NegotiationEvent) {
        log::info!("{} {}", event.negotiation_id(), event.to_wire());
    }
}
