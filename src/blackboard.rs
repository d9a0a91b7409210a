//! Shared store for step results, notes and artifacts of one answer run.
//!
//! Concurrent steps write here as they complete. Each step inserts only its
//! own key, so one mutex around the insert is all the coordination needed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::roles::StepRole;

/// Output of one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub role: StepRole,
    pub objective: String,
    pub output: String,
    /// Candidate model that produced `output`.
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardState {
    pub notes: Vec<String>,
    pub artifacts: BTreeMap<String, serde_json::Value>,
    pub steps: BTreeMap<String, StepResult>,
    /// Step ids in the order they were recorded.
    pub completion_order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Blackboard {
    state: Mutex<BoardState>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_note(&self, text: impl Into<String>) {
        self.state().notes.push(text.into());
    }

    pub fn add_artifact(&self, name: impl Into<String>, value: serde_json::Value) {
        self.state().artifacts.insert(name.into(), value);
    }

    /// Insert a step result under its own id. Re-recording an id replaces
    /// the result and moves it to the end of the completion order.
    pub fn record_step(&self, result: StepResult) {
        let mut state = self.state();
        state.completion_order.retain(|id| id != &result.step_id);
        state.completion_order.push(result.step_id.clone());
        state.steps.insert(result.step_id.clone(), result);
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> BoardState {
        self.state().clone()
    }

    /// Human-readable overview: notes, artifact names, step headers.
    pub fn summarize(&self) -> String {
        let state = self.state();
        let mut lines = Vec::new();
        if !state.notes.is_empty() {
            lines.push("Notes:".to_string());
            lines.extend(state.notes.iter().map(|n| format!("- {n}")));
        }
        if !state.artifacts.is_empty() {
            lines.push("Artifacts:".to_string());
            lines.extend(state.artifacts.keys().map(|k| format!("- {k}")));
        }
        if !state.steps.is_empty() {
            lines.push("Step Outputs:".to_string());
            for id in &state.completion_order {
                if let Some(s) = state.steps.get(id) {
                    lines.push(format!("[{id}] {}: {}", s.role, s.objective));
                }
            }
        }
        lines.join("\n")
    }
}
