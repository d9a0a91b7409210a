//! Orchestration errors.

use crate::config::ConfigError;
use crate::gateway::ProviderError;
use crate::roles::AgentRole;

#[derive(Debug, thiserror::Error)]
pub enum CabinetError {
    /// Every model in a candidate chain failed; carries the last failure.
    #[error("all candidate models failed for {role}; last tried {model}: {source}")]
    Exhausted {
        role: AgentRole,
        model: String,
        source: ProviderError,
    },
    #[error("no candidate models for {0}")]
    NoCandidates(AgentRole),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("gateway error: {0}")]
    Gateway(#[from] ProviderError),
}

impl CabinetError {
    /// The provider failure behind this error, if there is one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            CabinetError::Exhausted { source, .. } => Some(source),
            CabinetError::Gateway(e) => Some(e),
            CabinetError::NoCandidates(_) | CabinetError::Config(_) => None,
        }
    }
}
