//! Per-request model routing decision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::RoutingGoal;
use crate::extract::decode_lenient;
use crate::fallback::{candidate_chain, ModelChain};
use crate::prompts::role_messages;
use crate::roles::AgentRole;

/// Role→model assignment proposed for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub role_models: BTreeMap<String, String>,
    pub rationale: String,
    /// Model that made the decision.
    #[serde(default)]
    pub decided_by: String,
}

impl Decision {
    /// Tolerant decode of decider output. Unusable text gives an empty map.
    /// Only string assignments to models in `allowed` are kept.
    pub fn from_model_output(raw: &str, allowed: &[String]) -> Self {
        let proposal = decode_lenient::<RawDecision>(raw)
            .or_default_with("decision", RawDecision::default);

        let role_models = proposal
            .role_models
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(role, model)| match model {
                Value::String(m) => Some((role.trim().to_lowercase(), m.trim().to_string())),
                _ => None,
            })
            .filter(|(role, model)| {
                !role.is_empty() && allowed.iter().any(|a| a == model)
            })
            .collect();

        let rationale = match proposal.rationale {
            Some(Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        };

        Self {
            role_models,
            rationale,
            decided_by: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role_models.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    #[serde(default, alias = "role_map")]
    role_models: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    rationale: Option<Value>,
}

/// Small, cheap models that make reliable routing decisions, best first.
const PREFERRED_DECIDERS: &[&str] = &[
    "gpt-4o-mini",
    "claude-3-haiku-20240307",
    "gemini-1.5-flash-8b",
    "llama-3.3-70b-versatile",
    "qwen/qwen-2-vl-72b-instruct",
    "nousresearch/hermes-3-llama-3.1-405b",
    "microsoft/phi-3.5-mini-128k-instruct",
    "meta-llama/llama-3.2-11b-vision-instruct",
    "mistralai/pixtral-12b",
];

/// Decider model when none is configured: the first preferred decider in
/// `allowed`, else the first allowed model.
pub fn pick_decider_model(allowed: &[String]) -> Option<&str> {
    PREFERRED_DECIDERS
        .iter()
        .find_map(|p| allowed.iter().find(|m| m.as_str() == *p))
        .or_else(|| allowed.first())
        .map(String::as_str)
}

/// Models tried for the decision itself: its own model (or the default),
/// the broadly available fallbacks, then the default.
pub fn decider_candidates(
    decider_model: Option<&str>,
    default_model: &str,
    fallbacks: &[String],
) -> Vec<String> {
    candidate_chain(
        std::iter::once(decider_model.unwrap_or(default_model))
            .chain(fallbacks.iter().map(String::as_str))
            .chain(std::iter::once(default_model)),
    )
}

fn decision_prompt(query: &str, allowed: &[String], goal: RoutingGoal) -> String {
    let allowed_json = serde_json::to_string(allowed).unwrap_or_else(|_| "[]".to_string());
    format!("Routing goal: {goal}\nAllowed models (JSON array):\n{allowed_json}\nUser request:\n{query}")
}

/// Ask for a routing decision. `None` when every candidate failed; the
/// caller keeps its static routing in that case.
pub async fn decide(
    chain: &ModelChain<'_>,
    candidates: &[String],
    query: &str,
    allowed: &[String],
    goal: RoutingGoal,
) -> Option<Decision> {
    let messages = role_messages(AgentRole::Decider, decision_prompt(query, allowed, goal));
    match chain
        .complete_with(AgentRole::Decider, candidates, messages)
        .await
    {
        Ok(completion) => {
            let mut decision = Decision::from_model_output(&completion.content, allowed);
            decision.decided_by = completion.model;
            info!(
                model = %decision.decided_by,
                roles = decision.role_models.len(),
                goal = %goal,
                "routing decision"
            );
            Some(decision)
        }
        Err(e) => {
            warn!(error = %e, "decider unavailable, keeping static routing");
            None
        }
    }
}
