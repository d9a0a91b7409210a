//! The answer pipeline: decide → plan → steps → synthesize → critique.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::blackboard::{Blackboard, StepResult};
use crate::config::CabinetConfig;
use crate::critique::{finalize, Critique};
use crate::decider::{decide, decider_candidates, pick_decider_model, Decision};
use crate::error::CabinetError;
use crate::executor::StepExecutor;
use crate::fallback::ModelChain;
use crate::gateway::ChatGateway;
use crate::plan::{build_plan, Plan};
use crate::router::ModelRouter;

/// Everything one `answer` call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabinetResult {
    pub run_id: Uuid,
    pub query: String,
    pub plan: Plan,
    pub step_outputs: BTreeMap<String, StepResult>,
    pub draft_answer: String,
    pub final_answer: String,
    /// Last critique; `None` when no critique round ran.
    pub critique: Option<Critique>,
    pub critique_history: Vec<Critique>,
    pub iterations: u32,
    pub decision: Option<Decision>,
    /// Effective role→model routing after the decider.
    pub routing: BTreeMap<String, String>,
    pub notes: Vec<String>,
    /// Named artifacts recorded during the run (plan, routing decision).
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Step ids in the order they finished.
    #[serde(default)]
    pub completion_order: Vec<String>,
    /// Rendered blackboard summary.
    pub summary: String,
}

impl CabinetResult {
    /// Human-readable trace of the run.
    pub fn render_trace(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== run {} ===", self.run_id);
        if let Some(d) = &self.decision {
            let _ = writeln!(out, "\n-- routing (decided by {}) --", d.decided_by);
            if !d.rationale.is_empty() {
                let _ = writeln!(out, "{}", d.rationale);
            }
        } else {
            let _ = writeln!(out, "\n-- routing --");
        }
        for (role, model) in &self.routing {
            let _ = writeln!(out, "{role}: {model}");
        }

        let _ = writeln!(out, "\n-- plan --");
        for step in self.plan.steps() {
            let _ = writeln!(out, "[{}] {}: {}", step.id, step.role, step.objective);
            if !step.guidance.is_empty() {
                let _ = writeln!(out, "    guidance: {}", step.guidance);
            }
        }

        let _ = writeln!(out, "\n-- step outputs --");
        for (id, s) in &self.step_outputs {
            let _ = writeln!(out, "[{id}] {} via {}\n{}\n", s.role, s.model, s.output.trim_end());
        }

        let _ = writeln!(out, "-- critique --");
        match &self.critique {
            Some(c) => {
                let _ = writeln!(out, "quality: {}/5", c.quality);
                for issue in &c.issues {
                    let _ = writeln!(out, "issue: {issue}");
                }
                for fix in &c.suggested_fixes {
                    let _ = writeln!(out, "fix: {fix}");
                }
            }
            None => {
                let _ = writeln!(out, "(none)");
            }
        }
        let _ = writeln!(out, "iterations: {}", self.iterations);

        if !self.summary.is_empty() {
            let _ = writeln!(out, "\n-- blackboard --\n{}", self.summary);
        }
        out
    }
}

/// Orchestrator. Holds the static routing; each answer gets its own copy.
pub struct Cabinet {
    gateway: Arc<dyn ChatGateway>,
    config: CabinetConfig,
    router: ModelRouter,
}

impl Cabinet {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: CabinetConfig) -> Self {
        let router = config.router();
        Self {
            gateway,
            config,
            router,
        }
    }

    pub fn config(&self) -> &CabinetConfig {
        &self.config
    }

    /// Static routing, before any decider adjustment.
    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub async fn answer(&self, query: &str) -> Result<CabinetResult, CabinetError> {
        let run_id = Uuid::new_v4();
        let blackboard = Blackboard::new();
        let mut router = self.router.clone();
        info!(%run_id, parallel = self.config.parallel, "answer started");

        let decision = self.route(run_id, query, &mut router, &blackboard).await;

        let chain = ModelChain::new(self.gateway.as_ref(), &router, &self.config.fallback_models)
            .temperature(self.config.temperature)
            .run_id(run_id);

        let plan = build_plan(&chain, query).await?;
        if let Ok(value) = serde_json::to_value(&plan) {
            blackboard.add_artifact("plan", value);
        }

        let step_outputs = StepExecutor::new(&chain, &blackboard)
            .run_plan(
                &plan,
                query,
                self.config.parallel,
                self.config.workers_bound(),
            )
            .await?;

        let finalized = finalize(&chain, query, &step_outputs, self.config.iterations_bound()).await?;
        if let Some(c) = &finalized.critique {
            blackboard.add_note(format!(
                "critique: quality {}/5, {} issue(s) after {} iteration(s)",
                c.quality,
                c.issues.len(),
                finalized.iterations
            ));
        }

        info!(%run_id, iterations = finalized.iterations, "answer complete");
        let summary = blackboard.summarize();
        let board = blackboard.snapshot();
        Ok(CabinetResult {
            run_id,
            query: query.to_string(),
            plan,
            step_outputs,
            draft_answer: finalized.draft,
            final_answer: finalized.answer,
            critique: finalized.critique,
            critique_history: finalized.history,
            iterations: finalized.iterations,
            decision,
            routing: router.snapshot(),
            notes: board.notes,
            artifacts: board.artifacts,
            completion_order: board.completion_order,
            summary,
        })
    }

    /// Run the decider when an allowed-model list is configured and merge
    /// its proposal into `router`. Never fails the answer.
    async fn route(
        &self,
        run_id: Uuid,
        query: &str,
        router: &mut ModelRouter,
        blackboard: &Blackboard,
    ) -> Option<Decision> {
        if self.config.available_models.is_empty() {
            return None;
        }

        let decider_model = self
            .config
            .decider_model
            .as_deref()
            .or_else(|| pick_decider_model(&self.config.available_models));
        let candidates = decider_candidates(
            decider_model,
            router.default_model(),
            &self.config.fallback_models,
        );
        let decision = {
            let chain = ModelChain::new(self.gateway.as_ref(), router, &self.config.fallback_models)
                .temperature(self.config.temperature)
                .run_id(run_id);
            decide(
                &chain,
                &candidates,
                query,
                &self.config.available_models,
                self.config.routing_goal,
            )
            .await
        };

        match &decision {
            Some(d) => {
                router.apply_role_map(&d.role_models);
                blackboard.add_note(format!(
                    "routing decided by {} for {} role(s)",
                    d.decided_by,
                    d.role_models.len()
                ));
                if let Ok(value) = serde_json::to_value(d) {
                    blackboard.add_artifact("decision", value);
                }
            }
            None => blackboard.add_note("decider unavailable; static routing kept"),
        }
        decision
    }
}
