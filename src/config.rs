//! Engine configuration. A plain struct with a `Default` impl, no
//! file-parsing dependency — callers construct it however they want,
//! including struct-update syntax over the defaults.

/// Recognized configuration keys and their defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Cap on the center coordinator's synthesis loop.
    pub max_center_rounds: u32,
    /// Per-participant barrier timeout, in seconds.
    pub offer_timeout_seconds: u64,
    /// Formulation skill timeout, in seconds.
    pub formulation_timeout_seconds: u64,
    /// Await-user-confirmation timeout, in seconds.
    pub confirmation_timeout_seconds: u64,
    /// Default resonance fan-out (`k*`).
    pub default_k_star: usize,
    /// Maximum sub-negotiation recursion depth.
    pub max_recursion_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_center_rounds: 5,
            offer_timeout_seconds: 30,
            formulation_timeout_seconds: 10,
            confirmation_timeout_seconds: 300,
            default_k_star: 5,
            max_recursion_depth: 1,
        }
    }
}
