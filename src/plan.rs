//! Plan decomposition: one planner call turns a request into 1..=8 steps.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::CabinetError;
use crate::extract::decode_lenient;
use crate::fallback::ModelChain;
use crate::roles::{AgentRole, StepRole};

/// Upper bound on steps taken from a planner response.
pub const MAX_PLAN_STEPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(rename = "agent")]
    pub role: StepRole,
    pub objective: String,
    #[serde(default)]
    pub guidance: String,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        role: StepRole,
        objective: impl Into<String>,
        guidance: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            objective: objective.into(),
            guidance: guidance.into(),
        }
    }
}

/// Ordered steps with unique ids. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    /// Build from steps; an empty list becomes [`Plan::fallback`].
    pub fn new(steps: Vec<PlanStep>) -> Self {
        if steps.is_empty() {
            Self::fallback()
        } else {
            Self { steps }
        }
    }

    /// Fixed three-step plan used when the planner output is unusable.
    pub fn fallback() -> Self {
        Self {
            steps: vec![
                PlanStep::new("s1", StepRole::Researcher, "gather facts and definitions", ""),
                PlanStep::new("s2", StepRole::Engineer, "propose approach and solution", ""),
                PlanStep::new("s3", StepRole::Analyst, "analyze tradeoffs and edge cases", ""),
            ],
        }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Parse planner output. Returns the plan and whether it had to fall back.
    pub fn from_model_output(raw: &str) -> (Self, bool) {
        let proposal: Option<Proposal> = decode_lenient::<Proposal>(raw).value;
        let steps = proposal
            .and_then(|p| p.steps)
            .map(normalize_steps)
            .unwrap_or_default();
        if steps.is_empty() {
            (Self::fallback(), true)
        } else {
            (Self { steps }, false)
        }
    }
}

// Planner JSON as it actually arrives: every field optional, ids sometimes
// numeric, and the role key spelled either way.
#[derive(Debug, Deserialize)]
struct Proposal {
    #[serde(default)]
    steps: Option<Vec<ProposedStep>>,
}

#[derive(Debug, Deserialize)]
struct ProposedStep {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "role")]
    agent: Option<String>,
    #[serde(default)]
    objective: Option<String>,
    #[serde(default)]
    guidance: Option<String>,
}

fn normalize_steps(proposed: Vec<ProposedStep>) -> Vec<PlanStep> {
    let mut seen = HashSet::new();
    let mut steps = Vec::new();

    for (i, p) in proposed.into_iter().take(MAX_PLAN_STEPS).enumerate() {
        let base = p
            .id
            .as_ref()
            .and_then(id_text)
            .unwrap_or_else(|| format!("s{}", i + 1));
        let id = unique_id(base, &seen);
        seen.insert(id.clone());

        steps.push(PlanStep {
            id,
            role: StepRole::parse_or_default(p.agent.as_deref()),
            objective: p.objective.unwrap_or_default().trim().to_string(),
            guidance: p.guidance.unwrap_or_default().trim().to_string(),
        });
    }
    steps
}

fn id_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn unique_id(base: String, seen: &HashSet<String>) -> String {
    if !seen.contains(&base) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}-{n}");
        if !seen.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Ask the planner for a plan. Provider exhaustion propagates; unusable
/// output yields [`Plan::fallback`].
pub async fn build_plan(chain: &ModelChain<'_>, query: &str) -> Result<Plan, CabinetError> {
    let completion = chain.complete(AgentRole::Planner, None, query).await?;
    let (plan, fell_back) = Plan::from_model_output(&completion.content);
    info!(
        model = %completion.model,
        steps = plan.len(),
        fallback = fell_back,
        "plan ready"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_plan() {
        let raw = "Here you go:\n```json\n{\"steps\":[\
            {\"id\":\"a\",\"agent\":\"analyst\",\"objective\":\"compare\",\"guidance\":\"be brief\"},\
            {\"id\":\"b\",\"role\":\"Engineer\",\"objective\":\"build\"}]}\n```";
        let (plan, fell_back) = Plan::from_model_output(raw);
        assert!(!fell_back);
        assert_eq!(plan.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(plan.steps()[0].role, StepRole::Analyst);
        assert_eq!(plan.steps()[0].guidance, "be brief");
        assert_eq!(plan.steps()[1].role, StepRole::Engineer);
        assert_eq!(plan.steps()[1].guidance, "");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let (plan, _) = Plan::from_model_output(r#"{"steps":[{"agent":"wizard"},{"id":7}]}"#);
        assert_eq!(plan.steps()[0].id, "s1");
        assert_eq!(plan.steps()[0].role, StepRole::Researcher);
        assert_eq!(plan.steps()[1].id, "7");
    }

    #[test]
    fn duplicate_ids_are_made_unique() {
        let (plan, _) =
            Plan::from_model_output(r#"{"steps":[{"id":"x"},{"id":"x"},{"id":"x-2"},{"id":"x"}]}"#);
        let ids: Vec<_> = plan.ids().collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(unique.len(), 4);
        assert_eq!(ids[0], "x");
        assert_eq!(ids[1], "x-2");
    }

    #[test]
    fn long_plans_are_truncated() {
        let steps: Vec<String> = (0..12).map(|i| format!(r#"{{"id":"s{i}"}}"#)).collect();
        let raw = format!(r#"{{"steps":[{}]}}"#, steps.join(","));
        let (plan, _) = Plan::from_model_output(&raw);
        assert_eq!(plan.len(), MAX_PLAN_STEPS);
    }

    #[test]
    fn garbage_and_empty_fall_back() {
        for raw in ["not json at all", r#"{"steps":[]}"#, r#"{"plan":"x"}"#, ""] {
            let (plan, fell_back) = Plan::from_model_output(raw);
            assert!(fell_back, "{raw}");
            assert_eq!(plan, Plan::fallback());
        }
    }

    #[test]
    fn fallback_plan_shape() {
        let plan = Plan::fallback();
        assert_eq!(plan.ids().collect::<Vec<_>>(), vec!["s1", "s2", "s3"]);
        assert_eq!(
            plan.steps().iter().map(|s| s.role).collect::<Vec<_>>(),
            vec![StepRole::Researcher, StepRole::Engineer, StepRole::Analyst]
        );
    }

    #[test]
    fn empty_step_list_is_never_a_plan() {
        assert_eq!(Plan::new(Vec::new()), Plan::fallback());
    }
}
