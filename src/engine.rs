//! Negotiation engine (component I): orchestrates components A-H, the
//! parallel offer barrier, the bounded center coordinator loop, and
//! recursive sub-negotiation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{oneshot, Notify};
use tokio::time::timeout;

use crate::adapter::{Adapter, AgentRegistry};
use crate::config::EngineConfig;
use crate::encoder::Encoder;
use crate::errors::EngineError;
use crate::event::{EventPusher, NegotiationEvent};
use crate::llm_client::{PlatformLlmClient, ToolCall};
use crate::model::{
    AgentIdentity, AgentParticipant, DemandSnapshot, NegotiationSession, NegotiationState,
    Offer, ParticipantState, TraceEntry, DIAGNOSTIC_MAX_ROUNDS, DIAGNOSTIC_NO_OFFERS,
};
use crate::resonance::ResonanceDetector;
use crate::skills::{
    CenterContext, CenterSkill, FormulationContext, FormulationSkill, GapRecursionSkill,
    OfferSkill, SubNegotiationContext, SubNegotiationSkill,
};
use crate::tools::ToolRegistry;
use crate::vector::Vector;

/// Per-run parameters: the arguments `start_negotiation` needs beyond the
/// session itself. Only `adapter` and `llm_client` are required;
/// everything else has an engine-level default or is simply optional.
/// `Clone` so the engine can thread an identical set of defaults down into a
/// recursively-spawned sub-negotiation without re-assembling it field by
/// field.
#[derive(Clone)]
pub struct RunDefaults {
    pub adapter: Arc<dyn Adapter>,
    pub llm_client: Arc<dyn PlatformLlmClient>,
    pub formulation_skill: Option<Arc<dyn FormulationSkill>>,
    pub offer_skill: Option<Arc<dyn OfferSkill>>,
    pub center_skill: Option<Arc<dyn CenterSkill>>,
    pub sub_negotiation_skill: Option<Arc<dyn SubNegotiationSkill>>,
    pub gap_recursion_skill: Option<Arc<dyn GapRecursionSkill>>,
    pub agent_vectors: Option<HashMap<String, Vector>>,
    pub k_star: Option<usize>,
    pub agent_display_names: Option<HashMap<String, String>>,
    /// Registry scope consulted during matching (`"all"`, `"network"`, or
    /// `"scene:<id>"`).
    pub scope: String,
    pub register_session: Option<Arc<dyn Fn(&NegotiationSession) + Send + Sync>>,
}

impl RunDefaults {
    pub fn new(adapter: Arc<dyn Adapter>, llm_client: Arc<dyn PlatformLlmClient>) -> Self {
        Self {
            adapter,
            llm_client,
            formulation_skill: None,
            offer_skill: None,
            center_skill: None,
            sub_negotiation_skill: None,
            gap_recursion_skill: None,
            agent_vectors: None,
            k_star: None,
            agent_display_names: None,
            scope: "all".to_string(),
            register_session: None,
        }
    }
}

struct ActiveHandle {
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    confirm_tx: Mutex<Option<oneshot::Sender<Option<String>>>>,
    awaiting_confirmation: Arc<AtomicBool>,
}

/// Orchestrates the full negotiation lifecycle. One engine instance is
/// typically shared across many concurrent negotiations; per-negotiation
/// mutable state lives in the `NegotiationSession` and in this engine's
/// `active` map (confirmation/cancellation signaling only).
pub struct NegotiationEngine {
    config: EngineConfig,
    encoder: Arc<dyn Encoder>,
    resonance_detector: Arc<dyn ResonanceDetector>,
    event_pusher: Arc<dyn EventPusher>,
    tool_registry: ToolRegistry,
    agent_registry: Arc<AgentRegistry>,
    active: Mutex<HashMap<String, Arc<ActiveHandle>>>,
}

impl NegotiationEngine {
    pub(crate) fn new(
        config: EngineConfig,
        encoder: Arc<dyn Encoder>,
        resonance_detector: Arc<dyn ResonanceDetector>,
        event_pusher: Arc<dyn EventPusher>,
        tool_registry: ToolRegistry,
        agent_registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            config,
            encoder,
            resonance_detector,
            event_pusher,
            tool_registry,
            agent_registry,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent_registry(&self) -> &Arc<AgentRegistry> {
        &self.agent_registry
    }

    /// Registers an extension tool handler (rejects the reserved
    /// `output_plan` name and duplicates).
    pub fn register_tool_handler(
        &mut self,
        handler: Arc<dyn crate::tools::CenterToolHandler>,
    ) -> Result<(), EngineError> {
        self.tool_registry.register(handler)
    }

    pub fn is_awaiting_confirmation(&self, negotiation_id: &str) -> bool {
        self.active
            .lock()
            .unwrap()
            .get(negotiation_id)
            .map(|h| h.awaiting_confirmation.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Supplies the user's confirmation text (or `None` to accept the
    /// formulation skill's own output) and unblocks the confirmation gate.
    /// Errors if the negotiation is unknown or not currently awaiting
    /// confirmation.
    pub fn confirm_formulation(&self, negotiation_id: &str, text: Option<String>) -> Result<(), EngineError> {
        let guard = self.active.lock().unwrap();
        let handle = guard
            .get(negotiation_id)
            .ok_or_else(|| EngineError::UnknownNegotiation(negotiation_id.to_string()))?;
        if !handle.awaiting_confirmation.load(Ordering::SeqCst) {
            return Err(EngineError::WrongState {
                expected: "AWAITING_CONFIRMATION",
                actual: "other".to_string(),
            });
        }
        let sender = handle.confirm_tx.lock().unwrap().take();
        match sender {
            Some(tx) => {
                let _ = tx.send(text);
                Ok(())
            }
            None => Err(EngineError::WrongState {
                expected: "AWAITING_CONFIRMATION",
                actual: "already confirmed".to_string(),
            }),
        }
    }

    /// Cancels a running negotiation. Valid in any non-terminal state; sets
    /// the atomic cancel token all in-flight workers observe at their next
    /// suspension point.
    pub fn cancel(&self, negotiation_id: &str) -> Result<(), EngineError> {
        let guard = self.active.lock().unwrap();
        let handle = guard
            .get(negotiation_id)
            .ok_or_else(|| EngineError::UnknownNegotiation(negotiation_id.to_string()))?;
        handle.cancelled.store(true, Ordering::SeqCst);
        handle.cancel_notify.notify_waiters();
        Ok(())
    }

    fn register_active(&self, negotiation_id: &str) -> Arc<ActiveHandle> {
        let handle = Arc::new(ActiveHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            confirm_tx: Mutex::new(None),
            awaiting_confirmation: Arc::new(AtomicBool::new(false)),
        });
        self.active.lock().unwrap().insert(negotiation_id.to_string(), handle.clone());
        handle
    }

    fn unregister_active(&self, negotiation_id: &str) {
        self.active.lock().unwrap().remove(negotiation_id);
    }

    async fn emit(&self, event: NegotiationEvent) {
        self.event_pusher.push(event).await;
    }

    /// Runs one negotiation to a terminal state: CREATED through the
    /// formulation, confirmation, matching, offer-barrier, and
    /// center-coordinator phases. Always returns — session-scoped
    /// failures are reflected in `session.state == FAILED`, never a panic.
    pub fn start_negotiation<'a>(
        &'a self,
        session: NegotiationSession,
        defaults: RunDefaults,
    ) -> Pin<Box<dyn Future<Output = NegotiationSession> + Send + 'a>> {
        Box::pin(async move {
            let negotiation_id = session.negotiation_id.clone();
            let handle = self.register_active(&negotiation_id);
            let mut session = session;

            // A session constructed with the model-level default (the caller
            // did not explicitly override `max_center_rounds`) picks up this
            // engine's configured cap. An explicit override on the session
            // (as every test in tests/negotiation_scenarios.rs that sets it
            // to 0 or 1 does) always wins.
            if session.max_center_rounds == crate::model::DEFAULT_MAX_CENTER_ROUNDS {
                session.max_center_rounds = self.config.max_center_rounds;
            }

            self.run_formulation(&mut session, &defaults).await;

            if let Some(register) = &defaults.register_session {
                register(&session);
            }

            match self.await_confirmation(&mut session, &handle).await {
                ConfirmationOutcome::Cancelled => {
                    session.transition_to(NegotiationState::Cancelled);
                    self.unregister_active(&negotiation_id);
                    return session;
                }
                ConfirmationOutcome::TimedOut => {
                    session.plan_output = None;
                    session.push_trace(TraceEntry::new(
                        "confirmation_timeout",
                        "awaiting user confirmation",
                        "timed out",
                    ));
                    session.transition_to(NegotiationState::Completed);
                    self.unregister_active(&negotiation_id);
                    return session;
                }
                ConfirmationOutcome::Confirmed(text) => {
                    if let Some(text) = text {
                        session.demand.formulated_text = Some(text);
                    }
                }
            }

            session.transition_to(NegotiationState::Matching);
            if let Err(()) = self.run_matching(&mut session, &defaults).await {
                self.finalize_with_plan(&mut session, "(encoding failed)".to_string());
                self.emit_plan_ready(&session).await;
                self.unregister_active(&negotiation_id);
                return session;
            }

            if session.participants.is_empty() {
                session.transition_to(NegotiationState::Completed);
                session.plan_output = None;
                self.emit(NegotiationEvent::PlanReady {
                    negotiation_id: session.negotiation_id.clone(),
                    plan_text: DIAGNOSTIC_NO_OFFERS.to_string(),
                    center_rounds: session.center_rounds,
                    participant_ids: vec![],
                })
                .await;
                self.unregister_active(&negotiation_id);
                return session;
            }

            session.transition_to(NegotiationState::Offering);
            if self.run_barrier(&mut session, &defaults, &handle).await == BarrierOutcome::Cancelled {
                session.transition_to(NegotiationState::Cancelled);
                self.unregister_active(&negotiation_id);
                return session;
            }

            if session.offers_received() == 0 {
                session.transition_to(NegotiationState::Completed);
                session.plan_output = None;
                self.emit(NegotiationEvent::PlanReady {
                    negotiation_id: session.negotiation_id.clone(),
                    plan_text: DIAGNOSTIC_NO_OFFERS.to_string(),
                    center_rounds: session.center_rounds,
                    participant_ids: session.participants.iter().map(|p| p.identity.agent_id.clone()).collect(),
                })
                .await;
                self.unregister_active(&negotiation_id);
                return session;
            }

            session.transition_to(NegotiationState::Synthesizing);
            self.run_center_loop(&mut session, &defaults, &handle).await;

            self.unregister_active(&negotiation_id);
            session
        })
    }

    async fn run_formulation(&self, session: &mut NegotiationSession, defaults: &RunDefaults) {
        let raw_intent = session.demand.raw_intent.clone();
        match &defaults.formulation_skill {
            None => {
                // No formulation skill configured: the identity rewrite
                // still counts as a completed formulation round, matching
                // the always-one `formulation.ready` event this engine's
                // scenarios expect (see DESIGN.md, open question notes).
                session.transition_to(NegotiationState::AwaitingConfirmation);
                session.demand.formulated_text = Some(raw_intent.clone());
                self.emit(NegotiationEvent::FormulationReady {
                    negotiation_id: session.negotiation_id.clone(),
                    raw_intent,
                    formulated_text: session.demand.formulated_text.clone().unwrap(),
                    degraded: false,
                    degraded_reason: None,
                })
                .await;
            }
            Some(skill) => {
                session.transition_to(NegotiationState::Formulating);
                let ctx = FormulationContext {
                    raw_intent: &raw_intent,
                    user_id: &session.demand.user_id,
                    scene_id: &session.demand.scene_id,
                };
                let deadline = Duration::from_secs(self.config.formulation_timeout_seconds);
                let outcome = timeout(deadline, skill.execute(ctx)).await;
                match outcome {
                    Ok(Ok(result)) => {
                        session.demand.formulated_text = Some(result.formulated_text.clone());
                        session.transition_to(NegotiationState::Formulated);
                        session.transition_to(NegotiationState::AwaitingConfirmation);
                        self.emit(NegotiationEvent::FormulationReady {
                            negotiation_id: session.negotiation_id.clone(),
                            raw_intent,
                            formulated_text: result.formulated_text,
                            degraded: false,
                            degraded_reason: None,
                        })
                        .await;
                    }
                    Ok(Err(err)) => {
                        session.demand.formulated_text = Some(raw_intent.clone());
                        session.transition_to(NegotiationState::AwaitingConfirmation);
                        self.emit(NegotiationEvent::FormulationReady {
                            negotiation_id: session.negotiation_id.clone(),
                            raw_intent: raw_intent.clone(),
                            formulated_text: raw_intent,
                            degraded: true,
                            degraded_reason: Some(err.to_string()),
                        })
                        .await;
                    }
                    Err(_elapsed) => {
                        session.demand.formulated_text = Some(raw_intent.clone());
                        session.transition_to(NegotiationState::AwaitingConfirmation);
                        self.emit(NegotiationEvent::FormulationReady {
                            negotiation_id: session.negotiation_id.clone(),
                            raw_intent: raw_intent.clone(),
                            formulated_text: raw_intent,
                            degraded: true,
                            degraded_reason: Some("formulation skill timed out".to_string()),
                        })
                        .await;
                    }
                }
            }
        }
    }

    async fn await_confirmation(
        &self,
        _session: &mut NegotiationSession,
        handle: &Arc<ActiveHandle>,
    ) -> ConfirmationOutcome {
        let (tx, rx) = oneshot::channel();
        *handle.confirm_tx.lock().unwrap() = Some(tx);
        handle.awaiting_confirmation.store(true, Ordering::SeqCst);

        let deadline = Duration::from_secs(self.config.confirmation_timeout_seconds);
        let result = tokio::select! {
            _ = handle.cancel_notify.notified() => ConfirmationOutcome::Cancelled,
            recv = rx => match recv {
                Ok(text) => ConfirmationOutcome::Confirmed(text),
                Err(_) => ConfirmationOutcome::TimedOut,
            },
            _ = tokio::time::sleep(deadline) => ConfirmationOutcome::TimedOut,
        };

        handle.awaiting_confirmation.store(false, Ordering::SeqCst);
        result
    }

    async fn run_matching(&self, session: &mut NegotiationSession, defaults: &RunDefaults) -> Result<(), ()> {
        let formulated = session.demand.formulated_text.clone().unwrap_or_default();
        let demand_vector = match self.encoder.encode(&formulated).await {
            Ok(v) => v,
            Err(_) => return Err(()),
        };

        let agent_vectors: HashMap<String, Vector> = match &defaults.agent_vectors {
            Some(v) => v.clone(),
            None => {
                let candidates = self.agent_registry.resolve_scope(&defaults.scope);
                let mut map = HashMap::new();
                for agent_id in candidates {
                    let profile_text = self.agent_registry.profile_text(&agent_id).unwrap_or_default();
                    if let Ok(vector) = self.encoder.encode(&profile_text).await {
                        map.insert(agent_id, vector);
                    }
                }
                map
            }
        };

        let k_star = defaults.k_star.unwrap_or(self.config.default_k_star);
        let ranked = self.resonance_detector.detect(&demand_vector, &agent_vectors, k_star).await;

        for (agent_id, score) in &ranked {
            let display_name = defaults
                .agent_display_names
                .as_ref()
                .and_then(|m| m.get(agent_id))
                .cloned()
                .unwrap_or_else(|| self.agent_registry.display_name(agent_id));
            let identity = AgentIdentity::new(agent_id.clone(), display_name);
            session.participants.push(AgentParticipant::new(identity, *score));
        }

        self.emit(NegotiationEvent::ResonanceActivated {
            negotiation_id: session.negotiation_id.clone(),
            activated_count: ranked.len(),
            agents: ranked,
        })
        .await;

        Ok(())
    }

    async fn run_barrier(
        &self,
        session: &mut NegotiationSession,
        defaults: &RunDefaults,
        handle: &Arc<ActiveHandle>,
    ) -> BarrierOutcome {
        for participant in session.participants.iter_mut() {
            participant.state = ParticipantState::Active;
        }

        let timeout_dur = Duration::from_secs(self.config.offer_timeout_seconds);
        let mut join_handles = Vec::new();
        for participant in &session.participants {
            let identity = participant.identity.clone();
            let adapter = self
                .agent_registry
                .adapter_for(&identity.agent_id)
                .unwrap_or_else(|| defaults.adapter.clone());
            let offer_skill = defaults.offer_skill.clone();
            let formulated_demand = session.demand.formulated_text.clone().unwrap_or_default();
            let agent_registry = self.agent_registry.clone();
            let cancelled = handle.cancelled.clone();

            let jh = tokio::spawn(async move {
                if cancelled.load(Ordering::SeqCst) {
                    return (identity.agent_id.clone(), ParticipantOutcome::TimedOut);
                }
                let profile = agent_registry.get_profile(&identity.agent_id).await;
                let outcome = match offer_skill {
                    None => {
                        return (
                            identity.agent_id.clone(),
                            ParticipantOutcome::Failed("no offer skill configured".to_string()),
                        )
                    }
                    Some(skill) => timeout(timeout_dur, skill.execute(&identity, &profile, &formulated_demand, &adapter)).await,
                };
                match outcome {
                    Ok(Ok(result)) => (identity.agent_id.clone(), ParticipantOutcome::Replied(result.content)),
                    Ok(Err(err)) => (identity.agent_id.clone(), ParticipantOutcome::Failed(err.to_string())),
                    Err(_elapsed) => (identity.agent_id.clone(), ParticipantOutcome::TimedOut),
                }
            });
            join_handles.push(jh);
        }

        let abort_handles: Vec<_> = join_handles.iter().map(|jh| jh.abort_handle()).collect();

        let results = tokio::select! {
            _ = handle.cancel_notify.notified() => {
                for ah in &abort_handles {
                    ah.abort();
                }
                None
            }
            joined = futures_util::future::join_all(join_handles) => Some(joined),
        };

        let results = match results {
            None => return BarrierOutcome::Cancelled,
            Some(r) => r,
        };

        for result in results {
            let (agent_id, outcome) = match result {
                Ok(v) => v,
                Err(_join_err) => continue,
            };
            let participant = match session.participant_mut(&agent_id) {
                Some(p) => p,
                None => continue,
            };
            match outcome {
                ParticipantOutcome::Replied(content) => {
                    participant.state = ParticipantState::Replied;
                    participant.offer = Some(Offer {
                        agent_id: agent_id.clone(),
                        content: content.clone(),
                        created_at: chrono::Utc::now(),
                    });
                    let display_name = participant.identity.display_name.clone();
                    self.emit(NegotiationEvent::OfferReceived {
                        negotiation_id: session.negotiation_id.clone(),
                        agent_id,
                        display_name,
                        content,
                    })
                    .await;
                }
                ParticipantOutcome::TimedOut => {
                    participant.state = ParticipantState::Exited;
                    session.push_trace(TraceEntry::new("offer", agent_id, "timed out"));
                }
                ParticipantOutcome::Failed(reason) => {
                    participant.state = ParticipantState::Failed;
                    participant.last_error = Some(reason.clone());
                    session.push_trace(TraceEntry::new("offer", agent_id, reason));
                }
            }
        }

        self.emit(NegotiationEvent::BarrierComplete {
            negotiation_id: session.negotiation_id.clone(),
            total_participants: session.participants.len(),
            offers_received: session.offers_received(),
            exited_count: session.exited_count(),
        })
        .await;

        BarrierOutcome::Completed
    }

    fn degenerate_plan_text(&self, session: &NegotiationSession, marker: &str) -> String {
        let offers: Vec<String> = session
            .participants
            .iter()
            .filter_map(|p| p.offer.as_ref().map(|o| format!("{}: {}", p.identity.agent_id, o.content)))
            .collect();
        if offers.is_empty() {
            marker.to_string()
        } else {
            format!("{} {}", marker, offers.join("; "))
        }
    }

    fn finalize_with_plan(&self, session: &mut NegotiationSession, plan_text: String) {
        session.plan_output = Some(plan_text);
        session.transition_to(NegotiationState::Completed);
    }

    async fn emit_plan_ready(&self, session: &NegotiationSession) {
        self.emit(NegotiationEvent::PlanReady {
            negotiation_id: session.negotiation_id.clone(),
            plan_text: session.plan_output.clone().unwrap_or_default(),
            center_rounds: session.center_rounds,
            participant_ids: session.participants.iter().map(|p| p.identity.agent_id.clone()).collect(),
        })
        .await;
    }

    async fn run_center_loop(&self, session: &mut NegotiationSession, defaults: &RunDefaults, handle: &Arc<ActiveHandle>) {
        let mut history: Vec<ToolCall> = Vec::new();

        loop {
            if handle.cancelled.load(Ordering::SeqCst) {
                session.transition_to(NegotiationState::Cancelled);
                return;
            }

            let round_number = session.center_rounds + 1;
            if round_number > session.max_center_rounds {
                let plan = self.degenerate_plan_text(session, DIAGNOSTIC_MAX_ROUNDS);
                self.finalize_with_plan(session, plan);
                self.emit_plan_ready(session).await;
                return;
            }

            let participant_profiles: Vec<(AgentIdentity, Option<Offer>)> = session
                .participants
                .iter()
                .map(|p| (p.identity.clone(), p.offer.clone()))
                .collect();
            let formulated_demand = session.demand.formulated_text.clone().unwrap_or_default();
            let round_cap = session.max_center_rounds;

            let first_attempt = match &defaults.center_skill {
                Some(skill) => {
                    let ctx = CenterContext {
                        formulated_demand: &formulated_demand,
                        participant_profiles: &participant_profiles,
                        tool_call_history: &history,
                        round_number,
                        round_cap,
                    };
                    skill.execute(ctx).await
                }
                None => Err(crate::errors::SkillError::InvalidOutput {
                    skill: "center",
                    reason: "no center skill configured".to_string(),
                }),
            };

            let result = match first_attempt {
                Ok(r) => r,
                Err(_first_err) => {
                    let retry = match &defaults.center_skill {
                        Some(skill) => {
                            let ctx = CenterContext {
                                formulated_demand: &formulated_demand,
                                participant_profiles: &participant_profiles,
                                tool_call_history: &history,
                                round_number,
                                round_cap,
                            };
                            skill.execute(ctx).await
                        }
                        None => Err(crate::errors::SkillError::InvalidOutput {
                            skill: "center",
                            reason: "no center skill configured".to_string(),
                        }),
                    };
                    match retry {
                        Ok(r) => r,
                        Err(_second_err) => {
                            session.transition_to(NegotiationState::Failed);
                            session.plan_output = None;
                            self.emit(NegotiationEvent::PlanReady {
                                negotiation_id: session.negotiation_id.clone(),
                                plan_text: "(center synthesis failed)".to_string(),
                                center_rounds: session.center_rounds,
                                participant_ids: participant_profiles.iter().map(|(id, _)| id.agent_id.clone()).collect(),
                            })
                            .await;
                            return;
                        }
                    }
                }
            };

            // The round ran the center skill to completion (whether or not
            // it finalizes the session below), so it counts — a finalizing
            // round must still leave `center_rounds` at the round it
            // finalized in, matching §4.7/§8's `plan.ready.center_rounds`.
            session.center_rounds += 1;

            if result.tool_calls.is_empty() {
                let plan = result.content.unwrap_or_else(|| self.degenerate_plan_text(session, DIAGNOSTIC_MAX_ROUNDS));
                self.finalize_with_plan(session, plan);
                self.emit_plan_ready(session).await;
                return;
            }

            let mut finalized = false;
            for tool_call in result.tool_calls {
                history.push(tool_call.clone());
                let dispatched = self.dispatch_tool_call(session, defaults, &tool_call, round_number).await;
                if let DispatchOutcome::Finalized = dispatched {
                    finalized = true;
                    break;
                }
            }

            if finalized {
                self.emit_plan_ready(session).await;
                self.run_gap_recursion(session, defaults, handle).await;
                return;
            }
        }
    }

    /// After a plan is finalized via `output_plan`, offers the `gap_recursion`
    /// skill a chance to decompose it into gaps given the plan, participants,
    /// and recursion depth. Each gap is then fed to the `sub_negotiation`
    /// skill exactly like a `spawn_sub_negotiation` tool call would be (the
    /// `sub_negotiation` skill takes the parent session plus a gap spec —
    /// the gap recursion skill's output is that gap spec); a skill declining
    /// a gap (`None`) spawns nothing. Respects `max_recursion_depth` and
    /// cancellation exactly like the tool-dispatched path.
    async fn run_gap_recursion(&self, session: &mut NegotiationSession, defaults: &RunDefaults, handle: &Arc<ActiveHandle>) {
        let gap_skill = match &defaults.gap_recursion_skill {
            Some(skill) => skill,
            None => return,
        };
        if session.recursion_depth >= self.config.max_recursion_depth {
            return;
        }
        let plan = match session.plan_output.clone() {
            Some(plan) => plan,
            None => return,
        };
        let participants: Vec<AgentIdentity> = session.participants.iter().map(|p| p.identity.clone()).collect();

        let gaps = match gap_skill
            .execute(crate::skills::GapRecursionContext {
                plan: &plan,
                participants: &participants,
                recursion_depth: session.recursion_depth,
            })
            .await
        {
            Ok(gaps) => gaps,
            Err(err) => {
                session.push_trace(TraceEntry::new("gap_recursion", plan, err.to_string()));
                return;
            }
        };

        for gap in gaps {
            if handle.cancelled.load(Ordering::SeqCst) || session.recursion_depth >= self.config.max_recursion_depth {
                break;
            }
            let sub_skill = match &defaults.sub_negotiation_skill {
                Some(skill) => skill,
                None => break,
            };
            let seed = match sub_skill.execute(SubNegotiationContext { parent: &*session, gap_spec: &gap }).await {
                Ok(Some(seed)) => seed,
                Ok(None) => continue,
                Err(err) => {
                    session.push_trace(TraceEntry::new("gap_recursion", gap.to_string(), err.to_string()));
                    continue;
                }
            };

            let child_demand = DemandSnapshot::new(
                seed.sub_demand_text.clone(),
                session.demand.user_id.clone(),
                session.demand.scene_id.clone(),
            );
            let child_id = format!("{}::gap::{}", session.negotiation_id, session.trace.len());
            let child_session = session.child_for_sub_negotiation(child_id.clone(), child_demand);
            let child_defaults = self.defaults_for_seed(defaults, &seed.agent_ids).await;

            self.emit(NegotiationEvent::SubNegotiationStarted {
                negotiation_id: session.negotiation_id.clone(),
                sub_negotiation_id: child_id.clone(),
                sub_demand_text: seed.sub_demand_text.clone(),
            })
            .await;

            let _child_result = self.start_negotiation(child_session, child_defaults).await;
            session.push_trace(TraceEntry::new("gap_recursion", gap.to_string(), format!("spawned {}", child_id)));
        }
    }

    /// Narrows `defaults` for a spawned child negotiation to the agent ids a
    /// `sub_negotiation` skill explicitly seeded (it returns
    /// `{sub_demand_text, agent_ids}`). When `agent_ids` is
    /// non-empty, matching is restricted to exactly that candidate pool
    /// instead of re-running resonance over the whole registry scope; an
    /// empty `agent_ids` leaves the child's matching phase unrestricted
    /// (falls back to the parent's own scope/k_star).
    async fn defaults_for_seed(&self, defaults: &RunDefaults, agent_ids: &[String]) -> RunDefaults {
        let mut child_defaults = defaults.clone();
        if agent_ids.is_empty() {
            return child_defaults;
        }

        let mut vectors = HashMap::new();
        for agent_id in agent_ids {
            let vector = match defaults.agent_vectors.as_ref().and_then(|m| m.get(agent_id)) {
                Some(v) => Some(v.clone()),
                None => {
                    let profile_text = self.agent_registry.profile_text(agent_id).unwrap_or_default();
                    self.encoder.encode(&profile_text).await.ok()
                }
            };
            if let Some(vector) = vector {
                vectors.insert(agent_id.clone(), vector);
            }
        }
        child_defaults.agent_vectors = Some(vectors);
        child_defaults.k_star = Some(agent_ids.len());
        child_defaults
    }

    async fn dispatch_tool_call(
        &self,
        session: &mut NegotiationSession,
        defaults: &RunDefaults,
        tool_call: &ToolCall,
        round_number: u32,
    ) -> DispatchOutcome {
        match tool_call.name.as_str() {
            "ask_agent" => {
                let agent_id = tool_call.arguments.get("agent_id").and_then(Value::as_str).unwrap_or("").to_string();
                let question = tool_call.arguments.get("question").and_then(Value::as_str).unwrap_or("").to_string();
                if !session.has_participant(&agent_id) {
                    session.push_trace(TraceEntry::new("ask_agent", agent_id.clone(), "unknown agent"));
                } else {
                    let adapter = self.agent_registry.adapter_for(&agent_id).unwrap_or_else(|| defaults.adapter.clone());
                    let messages = vec![crate::adapter::ChatMessage::user(question.clone())];
                    match adapter.chat(&agent_id, &messages, None).await {
                        Ok(answer) => session.push_trace(TraceEntry::new("ask_agent", question, answer)),
                        Err(err) => session.push_trace(TraceEntry::new("ask_agent", question, err.to_string())),
                    }
                }
                self.emit(NegotiationEvent::CenterToolCall {
                    negotiation_id: session.negotiation_id.clone(),
                    tool_name: tool_call.name.clone(),
                    arguments: tool_call.arguments.clone(),
                    round_number,
                })
                .await;
                DispatchOutcome::Continued
            }
            "spawn_sub_negotiation" => {
                self.emit(NegotiationEvent::CenterToolCall {
                    negotiation_id: session.negotiation_id.clone(),
                    tool_name: tool_call.name.clone(),
                    arguments: tool_call.arguments.clone(),
                    round_number,
                })
                .await;

                if session.recursion_depth >= self.config.max_recursion_depth {
                    session.push_trace(TraceEntry::new(
                        "spawn_sub_negotiation",
                        tool_call.arguments.to_string(),
                        "skipped: max_depth",
                    ));
                    return DispatchOutcome::Continued;
                }

                let sub_demand = tool_call.arguments.get("sub_demand").and_then(Value::as_str).unwrap_or("").to_string();
                let gap_spec = json!({ "sub_demand": sub_demand, "scope": tool_call.arguments.get("scope") });

                let seed = match &defaults.sub_negotiation_skill {
                    Some(skill) => skill
                        .execute(SubNegotiationContext { parent: &*session, gap_spec: &gap_spec })
                        .await
                        .unwrap_or(None),
                    None => None,
                };

                if let Some(seed) = seed {
                    let child_demand = DemandSnapshot::new(seed.sub_demand_text.clone(), session.demand.user_id.clone(), session.demand.scene_id.clone());
                    let child_id = format!("{}::sub::{}", session.negotiation_id, session.trace.len());
                    let child_session = session.child_for_sub_negotiation(child_id.clone(), child_demand);
                    let child_defaults = self.defaults_for_seed(defaults, &seed.agent_ids).await;

                    self.emit(NegotiationEvent::SubNegotiationStarted {
                        negotiation_id: session.negotiation_id.clone(),
                        sub_negotiation_id: child_id,
                        sub_demand_text: seed.sub_demand_text,
                    })
                    .await;

                    let _child_result = self.start_negotiation(child_session, child_defaults).await;
                }
                DispatchOutcome::Continued
            }
            name => match self.tool_registry.get(name) {
                None => {
                    session.push_trace(TraceEntry::new("center", name, "unknown tool"));
                    DispatchOutcome::Continued
                }
                Some(tool_handler) => {
                    let timeout_dur = Duration::from_secs(self.config.offer_timeout_seconds);
                    let outcome = timeout(timeout_dur, tool_handler.handle(tool_call.arguments.clone())).await;
                    self.emit(NegotiationEvent::CenterToolCall {
                        negotiation_id: session.negotiation_id.clone(),
                        tool_name: tool_call.name.clone(),
                        arguments: tool_call.arguments.clone(),
                        round_number,
                    })
                    .await;
                    match outcome {
                        Ok(Ok(tool_outcome)) => {
                            if let Some(plan_text) = tool_outcome.finalize_with_plan {
                                session.plan_output = Some(plan_text);
                                session.transition_to(NegotiationState::Completed);
                                return DispatchOutcome::Finalized;
                            }
                            session.push_trace(TraceEntry::new("center", name, tool_outcome.artifact.to_string()));
                            DispatchOutcome::Continued
                        }
                        Ok(Err(err)) => {
                            session.push_trace(TraceEntry::new("center", name, err));
                            DispatchOutcome::Continued
                        }
                        Err(_elapsed) => {
                            session.push_trace(TraceEntry::new("center", name, "tool handler timed out"));
                            DispatchOutcome::Continued
                        }
                    }
                }
            },
        }
    }
}

enum ConfirmationOutcome {
    Confirmed(Option<String>),
    TimedOut,
    Cancelled,
}

#[derive(PartialEq, Eq)]
enum BarrierOutcome {
    Completed,
    Cancelled,
}

enum ParticipantOutcome {
    Replied(String),
    TimedOut,
    Failed(String),
}

enum DispatchOutcome {
    Continued,
    Finalized,
}
