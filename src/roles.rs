//! Agent roles.
//!
//! Roles form a closed set. Plan steps may only be assigned to the three
//! specialist roles; anything else a planner proposes lands on `researcher`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every role that makes model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Researcher,
    Engineer,
    Analyst,
    Synthesizer,
    Critic,
    Decider,
}

impl AgentRole {
    pub const ALL: [AgentRole; 7] = [
        AgentRole::Planner,
        AgentRole::Researcher,
        AgentRole::Engineer,
        AgentRole::Analyst,
        AgentRole::Synthesizer,
        AgentRole::Critic,
        AgentRole::Decider,
    ];

    /// Roles the decider assigns models to.
    pub const ROUTED: [AgentRole; 6] = [
        AgentRole::Planner,
        AgentRole::Researcher,
        AgentRole::Engineer,
        AgentRole::Analyst,
        AgentRole::Synthesizer,
        AgentRole::Critic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Researcher => "researcher",
            AgentRole::Engineer => "engineer",
            AgentRole::Analyst => "analyst",
            AgentRole::Synthesizer => "synthesizer",
            AgentRole::Critic => "critic",
            AgentRole::Decider => "decider",
        }
    }

    /// Attribution caller for gateway usage records.
    pub fn caller(&self) -> &'static str {
        match self {
            AgentRole::Planner => "cabinet::planner",
            AgentRole::Researcher => "cabinet::researcher",
            AgentRole::Engineer => "cabinet::engineer",
            AgentRole::Analyst => "cabinet::analyst",
            AgentRole::Synthesizer => "cabinet::synthesizer",
            AgentRole::Critic => "cabinet::critic",
            AgentRole::Decider => "cabinet::decider",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for AgentRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        AgentRole::ALL
            .into_iter()
            .find(|r| r.as_str() == key)
            .ok_or(UnknownRole(s.to_string()))
    }
}

/// Specialist role a plan step runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    Researcher,
    Engineer,
    Analyst,
}

impl StepRole {
    /// Lenient parse: case-insensitive, unrecognized or empty input is
    /// `Researcher`.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("engineer") => StepRole::Engineer,
            Some("analyst") => StepRole::Analyst,
            _ => StepRole::Researcher,
        }
    }

    pub fn agent(&self) -> AgentRole {
        match self {
            StepRole::Researcher => AgentRole::Researcher,
            StepRole::Engineer => AgentRole::Engineer,
            StepRole::Analyst => AgentRole::Analyst,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.agent().as_str()
    }
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
