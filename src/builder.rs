//! Engine builder (component K): fluent assembly of the engine from its
//! components, with defaults for anything not supplied.
//!
//! Splits engine-level fields (set once, at construction — encoder,
//! resonance detector, event pusher, tool handlers, timeouts) from per-run
//! defaults (set per `start_negotiation` call via
//! [`crate::engine::RunDefaults`]). Fluent `with_*` methods consume and
//! return `self`; a single terminal `build` produces the engine.

use std::sync::Arc;

use crate::adapter::AgentRegistry;
use crate::config::EngineConfig;
use crate::encoder::{Encoder, HashingEncoder};
use crate::engine::NegotiationEngine;
use crate::errors::EngineError;
use crate::event::{EventPusher, NullEventPusher};
use crate::resonance::{CosineResonanceDetector, ResonanceDetector};
use crate::tools::{CenterToolHandler, ToolRegistry};

/// Assembles a [`NegotiationEngine`]. Every `with_*` method consumes and
/// returns `self`; call [`Self::build`] last. Unsupplied components fall
/// back to the crate's dependency-free defaults ([`HashingEncoder`],
/// [`CosineResonanceDetector`], [`NullEventPusher`]) so a builder with no
/// calls at all still produces a runnable engine.
pub struct EngineBuilder {
    config: EngineConfig,
    encoder: Option<Arc<dyn Encoder>>,
    resonance_detector: Option<Arc<dyn ResonanceDetector>>,
    event_pusher: Option<Arc<dyn EventPusher>>,
    tool_registry: ToolRegistry,
    agent_registry: Arc<AgentRegistry>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            encoder: None,
            resonance_detector: None,
            event_pusher: None,
            tool_registry: ToolRegistry::new(),
            agent_registry: Arc::new(AgentRegistry::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_resonance_detector(mut self, detector: Arc<dyn ResonanceDetector>) -> Self {
        self.resonance_detector = Some(detector);
        self
    }

    pub fn with_event_pusher(mut self, pusher: Arc<dyn EventPusher>) -> Self {
        self.event_pusher = Some(pusher);
        self
    }

    pub fn with_agent_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.agent_registry = registry;
        self
    }

    /// Registers an extension tool handler for the center coordinator loop.
    /// Rejects the reserved `output_plan` name and duplicate names.
    pub fn with_tool_handler(mut self, handler: Arc<dyn CenterToolHandler>) -> Result<Self, EngineError> {
        self.tool_registry.register(handler)?;
        Ok(self)
    }

    pub fn offer_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.offer_timeout_seconds = seconds;
        self
    }

    pub fn confirmation_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.confirmation_timeout_seconds = seconds;
        self
    }

    pub fn formulation_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.formulation_timeout_seconds = seconds;
        self
    }

    pub fn max_center_rounds(mut self, rounds: u32) -> Self {
        self.config.max_center_rounds = rounds;
        self
    }

    pub fn max_recursion_depth(mut self, depth: u32) -> Self {
        self.config.max_recursion_depth = depth;
        self
    }

    pub fn default_k_star(mut self, k_star: usize) -> Self {
        self.config.default_k_star = k_star;
        self
    }

    pub fn build(self) -> NegotiationEngine {
        let encoder = self.encoder.unwrap_or_else(|| Arc::new(HashingEncoder::default()));
        let resonance_detector = self
            .resonance_detector
            .unwrap_or_else(|| Arc::new(CosineResonanceDetector));
        let event_pusher = self.event_pusher.unwrap_or_else(|| Arc::new(NullEventPusher));
        NegotiationEngine::new(
            self.config,
            encoder,
            resonance_detector,
            event_pusher,
            self.tool_registry,
            self.agent_registry,
        )
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
