//! A concurrent multi-agent negotiation engine: resonance-based agent
//! matching, parallel offer collection, and a bounded-round tool-calling
//! coordinator loop. See DESIGN.md for the architectural rationale behind
//! each module.

pub mod adapter;
pub mod builder;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod errors;
pub mod event;
pub mod llm_client;
pub mod model;
pub mod resonance;
pub mod skills;
pub mod tools;
pub mod vector;

pub use adapter::{Adapter, AgentRegistry, ChatChunkStream, ChatMessage, ProfileMap, RegisteredAgent};
pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use encoder::{Encoder, HashingEncoder};
pub use engine::{NegotiationEngine, RunDefaults};
pub use errors::{AdapterError, ConfigError, EncodingError, EngineError, LLMError, SkillError};
pub use event::{EventPusher, LoggingEventPusher, NegotiationEvent, NullEventPusher};
pub use llm_client::{LlmMessage, LlmResponse, PlatformLlmClient, ToolCall, ToolDefinition};
pub use model::{
    AgentIdentity, AgentParticipant, DemandSnapshot, NegotiationSession, NegotiationState, Offer,
    ParticipantState, TraceEntry,
};
pub use resonance::{CosineResonanceDetector, ResonanceDetector};
pub use skills::{
    CenterContext, CenterResult, CenterSkill, FormulationContext, FormulationResult, FormulationSkill,
    GapRecursionContext, GapRecursionSkill, OfferResult, OfferSkill, SubNegotiationContext,
    SubNegotiationResult, SubNegotiationSkill,
};
pub use tools::{CenterToolHandler, ToolOutcome, ToolRegistry, OUTPUT_PLAN_TOOL_NAME};
pub use vector::{bundle_binary, cosine_similarity, dot, norm, normalize, SimHashProjector, Vector};
