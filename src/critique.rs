//! Synthesis and the critique/revise loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::blackboard::StepResult;
use crate::error::CabinetError;
use crate::extract::decode_lenient;
use crate::fallback::ModelChain;
use crate::roles::AgentRole;

/// Critic assessment of one answer revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// 1 (poor) to 5 (excellent).
    pub quality: u8,
    pub issues: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

impl Default for Critique {
    fn default() -> Self {
        Self {
            quality: 3,
            issues: Vec::new(),
            suggested_fixes: Vec::new(),
        }
    }
}

impl Critique {
    /// Tolerant decode of critic output; anything unusable is the neutral
    /// default `{3, [], []}`.
    pub fn from_model_output(raw: &str) -> Self {
        match decode_lenient::<Value>(raw).value {
            Some(Value::Object(obj)) => Self {
                quality: obj.get("quality").map_or(3, quality_score),
                issues: obj.get("issues").map(string_list).unwrap_or_default(),
                suggested_fixes: obj
                    .get("suggested_fixes")
                    .map(string_list)
                    .unwrap_or_default(),
            },
            _ => {
                let preview: String = raw.chars().take(200).collect();
                tracing::warn!(raw = %preview, "unparsable critique, using neutral default");
                Self::default()
            }
        }
    }

    /// Stop rule: no issues and quality at least 4.
    pub fn is_acceptable(&self) -> bool {
        self.issues.is_empty() && self.quality >= 4
    }
}

fn quality_score(v: &Value) -> u8 {
    let q = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match q {
        Some(q) if q.is_finite() => q.round().clamp(1.0, 5.0) as u8,
        _ => 3,
    }
}

fn string_list(v: &Value) -> Vec<String> {
    let items: Vec<String> = match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Outcome of synthesis plus critique rounds.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub draft: String,
    pub answer: String,
    /// Last critique, if any round ran.
    pub critique: Option<Critique>,
    pub history: Vec<Critique>,
    /// 1 for the draft, plus one per revision.
    pub iterations: u32,
}

/// Step outputs as prompt context, ordered by step id.
pub fn steps_context(step_outputs: &BTreeMap<String, StepResult>) -> String {
    step_outputs
        .iter()
        .map(|(id, s)| format!("[{id}] {} - {}\n{}\n", s.role, s.objective, s.output))
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_block(items: &[String]) -> String {
    if items.is_empty() {
        "- none".to_string()
    } else {
        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
    }
}

fn revision_prompt(query: &str, answer: &str, critique: &Critique) -> String {
    format!(
        "User request: {query}\n\n\
         Improve the final answer based on this critique:\n\
         quality={}/5\nIssues:\n{}\nSuggested fixes:\n{}\n\n\
         Current answer:\n{answer}",
        critique.quality,
        list_block(&critique.issues),
        list_block(&critique.suggested_fixes),
    )
}

/// Draft an answer from the step outputs, then critique and revise it up to
/// `max_iterations - 1` times. `max_iterations` below 1 counts as 1.
pub async fn finalize(
    chain: &ModelChain<'_>,
    query: &str,
    step_outputs: &BTreeMap<String, StepResult>,
    max_iterations: u32,
) -> Result<Finalized, CabinetError> {
    let max_iterations = max_iterations.max(1);
    let context = steps_context(step_outputs);

    let synth_prompt = format!(
        "User request: {query}\n\nContext from team steps below. Produce a cohesive final answer.\n\n{context}"
    );
    let draft = chain
        .complete(AgentRole::Synthesizer, None, &synth_prompt)
        .await?
        .content;

    let mut answer = draft.clone();
    let mut history = Vec::new();
    let mut iterations = 1;

    for round in 1..max_iterations {
        let crit_prompt = format!(
            "User request: {query}\n\nProposed final answer:\n{answer}\n\nTeam context:\n{context}"
        );
        let raw = chain
            .complete(AgentRole::Critic, None, &crit_prompt)
            .await?
            .content;
        let critique = Critique::from_model_output(&raw);
        debug!(
            round,
            quality = critique.quality,
            issues = critique.issues.len(),
            "critique"
        );

        if critique.is_acceptable() {
            history.push(critique);
            break;
        }
        let prompt = revision_prompt(query, &answer, &critique);
        history.push(critique);

        answer = chain
            .complete(AgentRole::Synthesizer, None, &prompt)
            .await?
            .content;
        iterations += 1;
    }

    info!(iterations, critiques = history.len(), "answer finalized");
    Ok(Finalized {
        draft,
        answer,
        critique: history.last().cloned(),
        history,
        iterations,
    })
}
