//! Plan step execution, bounded-parallel or sequential.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::blackboard::{Blackboard, StepResult};
use crate::error::CabinetError;
use crate::fallback::ModelChain;
use crate::plan::{Plan, PlanStep};

pub struct StepExecutor<'a> {
    chain: &'a ModelChain<'a>,
    blackboard: &'a Blackboard,
}

impl<'a> StepExecutor<'a> {
    pub fn new(chain: &'a ModelChain<'a>, blackboard: &'a Blackboard) -> Self {
        Self { chain, blackboard }
    }

    /// Run one step through its routed candidate chain.
    pub async fn run_step(&self, step: &PlanStep, query: &str) -> Result<StepResult, CabinetError> {
        let prompt = step_prompt(step, query);
        let completion = self
            .chain
            .complete(step.role.agent(), Some(&step.id), &prompt)
            .await
            .map_err(|e| {
                warn!(step = %step.id, role = %step.role, error = %e, "step failed");
                e
            })?;

        Ok(StepResult {
            step_id: step.id.clone(),
            role: step.role,
            objective: step.objective.clone(),
            output: completion.content,
            model: completion.model,
        })
    }

    /// Run every step of `plan`. Results land on the blackboard as they
    /// complete; the returned map is keyed by step id. The first failing
    /// step aborts the rest.
    pub async fn run_plan(
        &self,
        plan: &Plan,
        query: &str,
        parallel: bool,
        max_workers: usize,
    ) -> Result<BTreeMap<String, StepResult>, CabinetError> {
        let mut outputs = BTreeMap::new();

        if parallel && plan.len() > 1 {
            let workers = max_workers.max(1).min(plan.len());
            info!(steps = plan.len(), workers, "running steps in parallel");

            let mut pending = stream::iter(plan.steps().iter().map(|step| self.run_step(step, query)))
                .buffer_unordered(workers);
            while let Some(result) = pending.next().await {
                self.commit(&mut outputs, result?);
            }
        } else {
            info!(steps = plan.len(), "running steps sequentially");
            for step in plan.steps() {
                let result = self.run_step(step, query).await?;
                self.commit(&mut outputs, result);
            }
        }

        Ok(outputs)
    }

    fn commit(&self, outputs: &mut BTreeMap<String, StepResult>, result: StepResult) {
        info!(step = %result.step_id, model = %result.model, "step complete");
        self.blackboard.record_step(result.clone());
        outputs.insert(result.step_id.clone(), result);
    }
}

fn step_prompt(step: &PlanStep, query: &str) -> String {
    format!(
        "User request: {query}\n\nYour step ({} - {}): {}\nGuidance: {}",
        step.id, step.role, step.objective, step.guidance
    )
}
