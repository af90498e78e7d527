//! Error taxonomy for the negotiation engine.
//!
//! Every variant here is confined to the layer named in its doc comment.
//! Plain enums with manual `Display` impls, matching the rest of this crate;
//! no `thiserror`.

use std::error::Error;
use std::fmt;

/// A client-side LLM channel failed. Confined to one participant.
#[derive(Debug, Clone)]
pub enum AdapterError {
    Timeout { agent_id: String },
    Provider { agent_id: String, message: String },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Timeout { agent_id } => {
                write!(f, "adapter call to agent '{}' timed out", agent_id)
            }
            AdapterError::Provider { agent_id, message } => {
                write!(f, "adapter call to agent '{}' failed: {}", agent_id, message)
            }
        }
    }
}

impl Error for AdapterError {}

/// The platform LLM call failed. Retried once at the center layer, then
/// fatal to the session.
#[derive(Debug, Clone)]
pub enum LLMError {
    Timeout,
    Transport(String),
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LLMError::Timeout => write!(f, "platform LLM call timed out"),
            LLMError::Transport(msg) => write!(f, "platform LLM call failed: {}", msg),
        }
    }
}

impl Error for LLMError {}

/// The encoder returned empty input or a zero-norm result. Fatal to the
/// affected operation (one participant's vector, or the demand vector).
#[derive(Debug, Clone)]
pub enum EncodingError {
    EmptyInput,
    ZeroNorm,
    Backend(String),
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::EmptyInput => write!(f, "cannot encode empty or whitespace-only text"),
            EncodingError::ZeroNorm => write!(f, "encoding resulted in a zero-norm vector"),
            EncodingError::Backend(msg) => write!(f, "encoder backend failed: {}", msg),
        }
    }
}

impl Error for EncodingError {}

/// A skill returned structurally invalid output. Fatal to the current phase.
#[derive(Debug, Clone)]
pub enum SkillError {
    InvalidOutput { skill: &'static str, reason: String },
    Timeout { skill: &'static str },
}

impl fmt::Display for SkillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkillError::InvalidOutput { skill, reason } => {
                write!(f, "skill '{}' returned invalid output: {}", skill, reason)
            }
            SkillError::Timeout { skill } => write!(f, "skill '{}' timed out", skill),
        }
    }
}

impl Error for SkillError {}

/// An engine invariant was violated by the caller (e.g. `confirm_formulation`
/// in the wrong state). Rejected to the caller, never fatal to the session.
#[derive(Debug, Clone)]
pub enum EngineError {
    WrongState { expected: &'static str, actual: String },
    UnknownNegotiation(String),
    MaxDepthExceeded,
    ReservedToolName(String),
    DuplicateToolName(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::WrongState { expected, actual } => write!(
                f,
                "operation requires state {} but session is in {}",
                expected, actual
            ),
            EngineError::UnknownNegotiation(id) => write!(f, "unknown negotiation '{}'", id),
            EngineError::MaxDepthExceeded => write!(f, "recursion depth exceeds max_recursion_depth"),
            EngineError::ReservedToolName(name) => {
                write!(f, "tool name '{}' is reserved", name)
            }
            EngineError::DuplicateToolName(name) => {
                write!(f, "tool handler '{}' is already registered", name)
            }
        }
    }
}

impl Error for EngineError {}

/// Construction-time misconfiguration (missing required dependencies).
#[derive(Debug, Clone)]
pub enum ConfigError {
    MissingAdapter,
    MissingLlmClient,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingAdapter => write!(f, "an adapter is required to build an engine run"),
            ConfigError::MissingLlmClient => {
                write!(f, "a platform LLM client is required to build an engine run")
            }
        }
    }
}

impl Error for ConfigError {}
