//! End-to-end negotiation scenarios (six core scenarios plus boundary
//! cases), exercised against the crate's public API with hand-rolled mocks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use towow_negotiation::{
    Adapter, AdapterError, AgentIdentity, ChatMessage, CenterContext, CenterResult, CenterSkill,
    DemandSnapshot, Encoder, EncodingError, EngineBuilder, EngineConfig, EventPusher,
    GapRecursionContext, GapRecursionSkill, LLMError, LlmMessage, LlmResponse, NegotiationEngine,
    NegotiationEvent, NegotiationSession, NegotiationState, OfferResult, OfferSkill,
    ParticipantState, PlatformLlmClient, ProfileMap, RunDefaults, SkillError, SubNegotiationContext,
    SubNegotiationResult, SubNegotiationSkill, ToolCall, ToolDefinition, Vector,
};

/// Collects pushed events in arrival order for per-negotiation assertions.
#[derive(Default)]
struct RecordingEventPusher {
    events: Mutex<Vec<NegotiationEvent>>,
}

#[async_trait]
impl EventPusher for RecordingEventPusher {
    async fn push(&self, event: NegotiationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingEventPusher {
    fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.event_type()).collect()
    }

    fn count(&self, event_type: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.event_type() == event_type).count()
    }

    fn plan_ready_text(&self) -> Option<String> {
        self.events.lock().unwrap().iter().find_map(|e| match e {
            NegotiationEvent::PlanReady { plan_text, .. } => Some(plan_text.clone()),
            _ => None,
        })
    }
}

/// Always returns the same vector, letting tests fix the demand vector
/// directly without routing through a real text embedding.
struct FixedVectorEncoder(Vector);

#[async_trait]
impl Encoder for FixedVectorEncoder {
    async fn encode(&self, _text: &str) -> Result<Vector, EncodingError> {
        Ok(self.0.clone())
    }
}

/// Answers every `chat` call with a fixed reply; used for `ask_agent`.
struct EchoAdapter(&'static str);

#[async_trait]
impl Adapter for EchoAdapter {
    async fn get_profile(&self, agent_id: &str) -> ProfileMap {
        let mut m = ProfileMap::new();
        m.insert("agent_id".to_string(), Value::String(agent_id.to_string()));
        m
    }

    async fn chat(
        &self,
        _agent_id: &str,
        _messages: &[ChatMessage],
        _system_prompt: Option<&str>,
    ) -> Result<String, AdapterError> {
        Ok(self.0.to_string())
    }
}

/// Never actually invoked directly by the engine (the center skill owns the
/// platform LLM call); present only because `RunDefaults` requires one.
struct StubPlatformLlmClient;

#[async_trait]
impl PlatformLlmClient for StubPlatformLlmClient {
    async fn chat(
        &self,
        _messages: &[LlmMessage],
        _system_prompt: Option<&str>,
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LLMError> {
        Err(LLMError::Transport("not exercised in these tests".to_string()))
    }
}

/// Succeeds with `"I'll help: <agent_id>"` unless the agent is in `fail_for`,
/// in which case it returns a `SkillError` (standing in for an adapter
/// failure the offer skill surfaces as structurally invalid output).
struct ScriptedOfferSkill {
    fail_for: Vec<String>,
    delay: Option<Duration>,
}

impl ScriptedOfferSkill {
    fn always_succeeds() -> Self {
        Self { fail_for: vec![], delay: None }
    }
}

#[async_trait]
impl OfferSkill for ScriptedOfferSkill {
    async fn execute(
        &self,
        identity: &AgentIdentity,
        _profile: &ProfileMap,
        _formulated_demand: &str,
        _adapter: &Arc<dyn Adapter>,
    ) -> Result<OfferResult, SkillError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_for.contains(&identity.agent_id) {
            return Err(SkillError::InvalidOutput {
                skill: "offer",
                reason: format!("adapter error for {}", identity.agent_id),
            });
        }
        Ok(OfferResult { content: format!("I'll help: {}", identity.agent_id) })
    }
}

/// Replays a fixed script of `(tool_calls, content)` pairs, one per round
/// number; once exhausted, returns an empty round (used to exercise the
/// round-cap path without an infinite script).
struct ScriptedCenterSkill {
    rounds: Mutex<Vec<(Vec<ToolCall>, Option<String>)>>,
}

impl ScriptedCenterSkill {
    fn new(rounds: Vec<(Vec<ToolCall>, Option<String>)>) -> Self {
        Self { rounds: Mutex::new(rounds) }
    }
}

#[async_trait]
impl CenterSkill for ScriptedCenterSkill {
    async fn execute(&self, _ctx: CenterContext<'_>) -> Result<CenterResult, SkillError> {
        let mut rounds = self.rounds.lock().unwrap();
        if rounds.is_empty() {
            return Ok(CenterResult { tool_calls: vec![], content: None });
        }
        let (tool_calls, content) = rounds.remove(0);
        Ok(CenterResult { tool_calls, content })
    }
}

/// Returns a fixed list of gap specs once, a single call proving sufficient
/// for these scenarios; records the `recursion_depth` it was called with.
struct ScriptedGapRecursionSkill {
    gaps: Vec<Value>,
    seen_depth: Mutex<Option<u32>>,
}

impl ScriptedGapRecursionSkill {
    fn new(gaps: Vec<Value>) -> Self {
        Self { gaps, seen_depth: Mutex::new(None) }
    }
}

#[async_trait]
impl GapRecursionSkill for ScriptedGapRecursionSkill {
    async fn execute(&self, ctx: GapRecursionContext<'_>) -> Result<Vec<Value>, SkillError> {
        *self.seen_depth.lock().unwrap() = Some(ctx.recursion_depth);
        Ok(self.gaps.clone())
    }
}

/// Accepts every gap spec whose `"sub_demand"` field is non-empty, declining
/// the rest; used to prove `gap_recursion` and `sub_negotiation` chain.
struct AcceptingSubNegotiationSkill;

#[async_trait]
impl SubNegotiationSkill for AcceptingSubNegotiationSkill {
    async fn execute(&self, ctx: SubNegotiationContext<'_>) -> Result<Option<SubNegotiationResult>, SkillError> {
        let sub_demand = ctx.gap_spec.get("sub_demand").and_then(Value::as_str).unwrap_or("");
        if sub_demand.is_empty() {
            return Ok(None);
        }
        Ok(Some(SubNegotiationResult { sub_demand_text: sub_demand.to_string(), agent_ids: vec![] }))
    }
}

fn output_plan_call(plan_text: &str) -> ToolCall {
    ToolCall { id: "t1".to_string(), name: "output_plan".to_string(), arguments: json!({"plan_text": plan_text}) }
}

fn ask_agent_call(agent_id: &str, question: &str) -> ToolCall {
    ToolCall {
        id: "t0".to_string(),
        name: "ask_agent".to_string(),
        arguments: json!({"agent_id": agent_id, "question": question}),
    }
}

fn spawn_sub_negotiation_call(sub_demand: &str) -> ToolCall {
    ToolCall {
        id: "t0".to_string(),
        name: "spawn_sub_negotiation".to_string(),
        arguments: json!({"sub_demand": sub_demand}),
    }
}

fn demand(text: &str) -> DemandSnapshot {
    DemandSnapshot::new(text, "user-1", "scene-1")
}

fn init_logging() {
    let _ = env_logger::try_init();
}

/// Runs a negotiation to completion, auto-confirming formulation as soon as
/// the engine reaches `AWAITING_CONFIRMATION` (every scenario here supplies
/// no `formulation_skill`, so the gate opens almost immediately).
async fn run_confirmed(
    engine: &NegotiationEngine,
    session: NegotiationSession,
    defaults: RunDefaults,
) -> NegotiationSession {
    let negotiation_id = session.negotiation_id.clone();
    let negotiation = engine.start_negotiation(session, defaults);
    let confirm = async {
        for _ in 0..10_000 {
            if engine.is_awaiting_confirmation(&negotiation_id) {
                engine.confirm_formulation(&negotiation_id, None).unwrap();
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("negotiation never reached AWAITING_CONFIRMATION");
    };
    let (session, _) = tokio::join!(negotiation, confirm);
    session
}

fn unit_vector_with_first_component(score: f32) -> Vector {
    vec![score, (1.0 - score * score).sqrt()]
}

/// S1. Three agents scored 0.9/0.85/0.2, k* = 2; center emits `output_plan`
/// on round 1. Expects A and B replied, exact plan text, and the precise
/// event sequence.
#[tokio::test]
async fn s1_happy_path_two_of_three_selected_and_plan_synthesized() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new()
        .with_encoder(encoder)
        .with_event_pusher(pusher.clone())
        .build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));
    agent_vectors.insert("B".to_string(), unit_vector_with_first_component(0.85));
    agent_vectors.insert("C".to_string(), unit_vector_with_first_component(0.2));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![(
        vec![output_plan_call("Partner with A and B.")],
        None,
    )])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(2);

    let session = NegotiationSession::new("s1", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output.as_deref(), Some("Partner with A and B."));
    assert_eq!(session.center_rounds, 1);
    assert_eq!(session.participants.len(), 2);
    for p in &session.participants {
        assert_eq!(p.state, ParticipantState::Replied);
        assert_ne!(p.identity.agent_id, "C");
    }

    assert_eq!(
        pusher.event_types(),
        vec![
            "formulation.ready",
            "resonance.activated",
            "offer.received",
            "offer.received",
            "barrier.complete",
            "center.tool_call",
            "plan.ready",
        ]
    );
    assert_eq!(pusher.count("plan.ready"), 1);
}

/// S2. B's offer channel fails; A succeeds. B ends FAILED with no offer;
/// the barrier still completes with exactly one offer received.
#[tokio::test]
async fn s2_participant_failure_does_not_abort_the_barrier() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).with_event_pusher(pusher.clone()).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));
    agent_vectors.insert("B".to_string(), unit_vector_with_first_component(0.85));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill =
        Some(Arc::new(ScriptedOfferSkill { fail_for: vec!["B".to_string()], delay: None }));
    defaults.center_skill =
        Some(Arc::new(ScriptedCenterSkill::new(vec![(vec![output_plan_call("Go with A.")], None)])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(2);

    let session = NegotiationSession::new("s2", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    let b = session.participant("B").unwrap();
    assert_eq!(b.state, ParticipantState::Failed);
    assert!(b.offer.is_none());
    assert!(b.last_error.is_some());
    assert_eq!(session.offers_received(), 1);
    assert_eq!(session.exited_count(), 1);
    assert_eq!(pusher.count("offer.received"), 1);
}

/// S3. Center emits `ask_agent` then `output_plan` in a single round; both
/// are traced as `center.tool_call`, the ask is recorded in the trace, and
/// the plan finalizes the session in one round.
#[tokio::test]
async fn s3_two_tool_calls_in_one_round_ask_then_output_plan() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).with_event_pusher(pusher.clone()).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults =
        RunDefaults::new(Arc::new(EchoAdapter("available next week")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![(
        vec![ask_agent_call("A", "availability?"), output_plan_call("Go.")],
        None,
    )])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let session = NegotiationSession::new("s3", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output.as_deref(), Some("Go."));
    assert_eq!(session.center_rounds, 1);
    assert_eq!(pusher.count("center.tool_call"), 2);
    assert!(session
        .trace
        .iter()
        .any(|t| t.step == "ask_agent" && t.output_summary == "available next week"));
}

/// S4. `max_center_rounds = 1`; the center skill returns no tool calls in
/// round 1, so the loop synthesizes the degenerate plan and completes.
#[tokio::test]
async fn s4_round_cap_with_no_tool_calls_yields_degenerate_plan() {
    init_logging();
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![(vec![], None)])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let mut session = NegotiationSession::new("s4", demand("I need a technical co-founder"));
    session.max_center_rounds = 1;
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.plan_output.as_deref().unwrap().starts_with("(max-rounds reached)"));
}

/// S5. The user never confirms; the confirmation gate times out and the
/// session completes with no plan and no `resonance.activated` event.
#[tokio::test]
async fn s5_confirmation_timeout_completes_with_no_plan() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let engine = EngineBuilder::new()
        .with_event_pusher(pusher.clone())
        .confirmation_timeout_seconds(0)
        .build();

    let defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    let session = NegotiationSession::new("s5", demand("I need a technical co-founder"));
    let session = engine.start_negotiation(session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.plan_output.is_none());
    assert!(session.trace.iter().any(|t| t.step == "confirmation_timeout"));
    assert_eq!(pusher.count("resonance.activated"), 0);
}

/// S6. `spawn_sub_negotiation` at `recursion_depth == MAX_DEPTH` is a no-op:
/// traced as skipped, no child session, no `sub_negotiation.started` event.
#[tokio::test]
async fn s6_sub_negotiation_at_max_depth_is_skipped() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).with_event_pusher(pusher.clone()).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![
        (vec![spawn_sub_negotiation_call("find a lawyer")], None),
        (vec![output_plan_call("Done.")], None),
    ])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let mut session = NegotiationSession::new("s6", demand("I need a technical co-founder"));
    session.recursion_depth = EngineConfig::default().max_recursion_depth;
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output.as_deref(), Some("Done."));
    assert!(session.trace.iter().any(|t| t.output_summary.contains("skipped: max_depth")));
    assert_eq!(pusher.count("sub_negotiation.started"), 0);
}

/// Boundary: zero registered agents -> resonance returns empty -> phase 4
/// skipped -> COMPLETED with the "(no offers)" diagnostic plan.
#[tokio::test]
async fn boundary_zero_agents_yields_no_offers_diagnostic() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).with_event_pusher(pusher.clone()).build();

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.agent_vectors = Some(HashMap::new());

    let session = NegotiationSession::new("boundary-1", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output, None);
    assert_eq!(pusher.plan_ready_text().as_deref(), Some("(no offers)"));
    assert_eq!(pusher.count("barrier.complete"), 0);
}

/// Boundary: `k_star = 0` produces the same outcome as zero agents.
#[tokio::test]
async fn boundary_k_star_zero_yields_no_offers_diagnostic() {
    init_logging();
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(0);

    let session = NegotiationSession::new("boundary-2", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.participants.is_empty());
    assert_eq!(session.plan_output, None);
}

/// Boundary: every participant times out -> `offers_received == 0` ->
/// diagnostic plan, even though participants themselves were created.
#[tokio::test]
async fn boundary_all_participants_time_out_yields_no_offers_diagnostic() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new()
        .with_encoder(encoder)
        .with_event_pusher(pusher.clone())
        .offer_timeout_seconds(0)
        .build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill {
        fail_for: vec![],
        delay: Some(Duration::from_millis(200)),
    }));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let session = NegotiationSession::new("boundary-3", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.offers_received(), 0);
    assert_eq!(session.participant("A").unwrap().state, ParticipantState::Exited);
    assert_eq!(pusher.plan_ready_text().as_deref(), Some("(no offers)"));
}

/// Boundary: `max_center_rounds = 0` enters synthesis and exits immediately
/// with the degenerate plan, never invoking the center skill.
#[tokio::test]
async fn boundary_max_center_rounds_zero_exits_immediately() {
    init_logging();
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);
    // No center_skill configured at all: if it were invoked, the session
    // would fail since `run_center_loop` falls back to a `SkillError`.

    let mut session = NegotiationSession::new("boundary-4", demand("I need a technical co-founder"));
    session.max_center_rounds = 0;
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.center_rounds, 0);
    assert!(session.plan_output.as_deref().unwrap().starts_with("(max-rounds reached)"));
}

/// Boundary: cancelling during OFFERING aborts in-flight workers and
/// produces no `plan.ready` event at all.
#[tokio::test]
async fn boundary_cancel_during_offering_suppresses_plan_ready() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new()
        .with_encoder(encoder)
        .with_event_pusher(pusher.clone())
        .offer_timeout_seconds(60)
        .build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill {
        fail_for: vec![],
        delay: Some(Duration::from_secs(30)),
    }));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let session = NegotiationSession::new("boundary-5", demand("I need a technical co-founder"));
    let negotiation_id = session.negotiation_id.clone();
    let negotiation = engine.start_negotiation(session, defaults);
    let driver = async {
        for _ in 0..10_000 {
            if engine.is_awaiting_confirmation(&negotiation_id) {
                engine.confirm_formulation(&negotiation_id, None).unwrap();
                break;
            }
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.cancel(&negotiation_id).unwrap();
    };
    let (session, _) = tokio::join!(negotiation, driver);

    assert_eq!(session.state, NegotiationState::Cancelled);
    assert_eq!(pusher.count("plan.ready"), 0);
}

/// Gap recursion: once `output_plan` finalizes a plan, a configured
/// `gap_recursion_skill` decomposes it into a gap, `sub_negotiation_skill`
/// accepts that gap, and a child negotiation is spawned and reaches its own
/// terminal state (via its own confirmation timeout, never externally
/// confirmed here).
#[tokio::test]
async fn gap_recursion_spawns_child_negotiation_for_accepted_gap() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new()
        .with_encoder(encoder)
        .with_event_pusher(pusher.clone())
        .confirmation_timeout_seconds(1)
        .build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let gap_skill = Arc::new(ScriptedGapRecursionSkill::new(vec![json!({"sub_demand": "find a lawyer"})]));
    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill =
        Some(Arc::new(ScriptedCenterSkill::new(vec![(vec![output_plan_call("Plan.")], None)])));
    defaults.gap_recursion_skill = Some(gap_skill.clone());
    defaults.sub_negotiation_skill = Some(Arc::new(AcceptingSubNegotiationSkill));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let session = NegotiationSession::new("gap1", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.plan_output.as_deref(), Some("Plan."));
    assert_eq!(*gap_skill.seen_depth.lock().unwrap(), Some(0));
    assert_eq!(pusher.count("sub_negotiation.started"), 1);
    assert!(session.trace.iter().any(|t| t.step == "gap_recursion" && t.output_summary.starts_with("spawned")));
}

/// Gap recursion never runs when the center loop only ever produced a
/// degenerate plan (no `output_plan` tool call, hence no `plan_output` to
/// decompose): the configured `gap_recursion_skill` is never invoked.
#[tokio::test]
async fn gap_recursion_is_skipped_for_a_degenerate_plan() {
    init_logging();
    let pusher = Arc::new(RecordingEventPusher::default());
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).with_event_pusher(pusher.clone()).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let gap_skill = Arc::new(ScriptedGapRecursionSkill::new(vec![json!({"sub_demand": "find a lawyer"})]));
    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![(vec![], None)])));
    defaults.gap_recursion_skill = Some(gap_skill.clone());
    defaults.sub_negotiation_skill = Some(Arc::new(AcceptingSubNegotiationSkill));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    let session = NegotiationSession::new("gap2", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert!(session.plan_output.as_deref().unwrap().starts_with("(max-rounds reached)"));
    assert_eq!(*gap_skill.seen_depth.lock().unwrap(), None);
    assert_eq!(pusher.count("sub_negotiation.started"), 0);
}

/// `EngineBuilder::max_center_rounds` takes effect on a session that never
/// overrode `max_center_rounds` itself: three non-finalizing rounds are
/// scripted, but the cap of 2 forces a degenerate plan after the second.
#[tokio::test]
async fn builder_max_center_rounds_applies_to_a_fresh_session() {
    init_logging();
    let encoder = Arc::new(FixedVectorEncoder(vec![1.0, 0.0]));
    let engine = EngineBuilder::new().with_encoder(encoder).max_center_rounds(2).build();

    let mut agent_vectors = HashMap::new();
    agent_vectors.insert("A".to_string(), unit_vector_with_first_component(0.9));

    let mut defaults = RunDefaults::new(Arc::new(EchoAdapter("n/a")), Arc::new(StubPlatformLlmClient));
    defaults.offer_skill = Some(Arc::new(ScriptedOfferSkill::always_succeeds()));
    defaults.center_skill = Some(Arc::new(ScriptedCenterSkill::new(vec![
        (vec![ask_agent_call("A", "ping")], None),
        (vec![ask_agent_call("A", "ping")], None),
        (vec![ask_agent_call("A", "ping")], None),
    ])));
    defaults.agent_vectors = Some(agent_vectors);
    defaults.k_star = Some(1);

    // A session built with no explicit override, exactly like an application
    // that only ever configures the engine once at startup.
    let session = NegotiationSession::new("gap3", demand("I need a technical co-founder"));
    let session = run_confirmed(&engine, session, defaults).await;

    assert_eq!(session.state, NegotiationState::Completed);
    assert_eq!(session.center_rounds, 2);
    assert!(session.plan_output.as_deref().unwrap().starts_with("(max-rounds reached)"));
}

/// Boundary: registering a handler named `output_plan` is rejected.
#[tokio::test]
async fn boundary_duplicate_output_plan_handler_name_is_rejected() {
    init_logging();
    struct Impostor;
    #[async_trait]
    impl towow_negotiation::CenterToolHandler for Impostor {
        fn name(&self) -> &str {
            "output_plan"
        }
        async fn handle(&self, _arguments: Value) -> Result<towow_negotiation::ToolOutcome, String> {
            Ok(towow_negotiation::ToolOutcome::artifact(Value::Null))
        }
    }
    let result = EngineBuilder::new().with_tool_handler(Arc::new(Impostor));
    assert!(result.is_err());
}
