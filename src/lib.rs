#![forbid(unsafe_code)]

//! # cabinet
//!
//! A small cabinet of role-specialized model calls answering one request.
//!
//! A planner splits the request into steps, researcher/engineer/analyst
//! calls work the steps concurrently, a synthesizer merges their output and
//! a critic drives a bounded revise loop. Each role can run on its own
//! model; an optional decider call picks those models per request, and every
//! call falls back across a chain of candidate models when one is missing or
//! keeps failing.

pub mod blackboard;
pub mod config;
pub mod critique;
pub mod decider;
pub mod error;
pub mod executor;
pub mod extract;
pub mod fallback;
pub mod gateway;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod roles;
pub mod router;
pub mod telemetry;

pub use blackboard::{Blackboard, StepResult};
pub use config::{CabinetConfig, ConfigError, RoutingGoal};
pub use critique::Critique;
pub use decider::Decision;
pub use error::CabinetError;
pub use gateway::{Attribution, ChatGateway, GatewayConfig, ProviderError, ProviderGateway, UsageSink};
pub use orchestrator::{Cabinet, CabinetResult};
pub use plan::{Plan, PlanStep};
pub use roles::{AgentRole, StepRole};
pub use router::ModelRouter;
