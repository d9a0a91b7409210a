//! Candidate chains: try model A, then B, then C.
//!
//! The gateway already retried each model as far as its own budget allows.
//! A failure reaching this layer means that model is done for this call, so
//! the chain moves to the next candidate regardless of failure class.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CabinetError;
use crate::gateway::{Attribution, ChatGateway, ChatRequest, Message};
use crate::prompts::role_messages;
use crate::roles::AgentRole;
use crate::router::ModelRouter;

/// Successful output of a chain, with the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub model: String,
    pub content: String,
    /// Candidates tried, including the successful one.
    pub attempts: usize,
}

/// Ordered, de-duplicated candidate list with empty entries dropped.
pub fn candidate_chain<'s, I>(models: I) -> Vec<String>
where
    I: IntoIterator<Item = &'s str>,
{
    let mut chain: Vec<String> = Vec::new();
    for model in models {
        let model = model.trim();
        if !model.is_empty() && !chain.iter().any(|m| m == model) {
            chain.push(model.to_string());
        }
    }
    chain
}

/// Everything a role call needs: gateway, routing, fallbacks, attribution.
#[derive(Clone, Copy)]
pub struct ModelChain<'a> {
    gateway: &'a dyn ChatGateway,
    router: &'a ModelRouter,
    fallback_models: &'a [String],
    temperature: f32,
    run_id: Option<Uuid>,
}

impl<'a> ModelChain<'a> {
    pub fn new(
        gateway: &'a dyn ChatGateway,
        router: &'a ModelRouter,
        fallback_models: &'a [String],
    ) -> Self {
        Self {
            gateway,
            router,
            fallback_models,
            temperature: 0.7,
            run_id: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn router(&self) -> &'a ModelRouter {
        self.router
    }

    /// `[routed primary, default, fallbacks...]` for a role or step.
    pub fn candidates(&self, role: AgentRole, step_id: Option<&str>) -> Vec<String> {
        let primary = self.router.resolve_role(role, step_id);
        candidate_chain(
            [primary, self.router.default_model()]
                .into_iter()
                .chain(self.fallback_models.iter().map(String::as_str)),
        )
    }

    /// Run `role`'s system prompt plus `user_prompt` through the routed chain.
    pub async fn complete(
        &self,
        role: AgentRole,
        step_id: Option<&str>,
        user_prompt: &str,
    ) -> Result<Completion, CabinetError> {
        let candidates = self.candidates(role, step_id);
        self.complete_with(role, &candidates, role_messages(role, user_prompt))
            .await
    }

    /// Try `candidates` in order; first success wins, otherwise the last
    /// failure is returned.
    pub async fn complete_with(
        &self,
        role: AgentRole,
        candidates: &[String],
        messages: Vec<Message>,
    ) -> Result<Completion, CabinetError> {
        let mut last_failure = None;

        for (idx, model) in candidates.iter().enumerate() {
            let mut attribution = Attribution::new(role.caller());
            if let Some(run_id) = self.run_id {
                attribution = attribution.with_run(run_id);
            }
            let req = ChatRequest::new(model.as_str(), messages.clone(), attribution)
                .temperature(self.temperature);

            match self.gateway.chat(req).await {
                Ok(resp) => {
                    debug!(role = %role, model = %model, attempt = idx + 1, "candidate succeeded");
                    return Ok(Completion {
                        model: model.clone(),
                        content: resp.content,
                        attempts: idx + 1,
                    });
                }
                Err(e) => {
                    warn!(
                        role = %role,
                        model = %model,
                        class = %e.class(),
                        error = %e,
                        "candidate model failed"
                    );
                    last_failure = Some((model.clone(), e));
                }
            }
        }

        match last_failure {
            Some((model, source)) => Err(CabinetError::Exhausted {
                role,
                model,
                source,
            }),
            None => Err(CabinetError::NoCandidates(role)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_drops_empties_and_duplicates_in_order() {
        let chain = candidate_chain(["a", "", "b", " a ", "c", "b"]);
        assert_eq!(chain, vec!["a", "b", "c"]);
    }

    #[test]
    fn candidates_start_with_routed_then_default() {
        struct Never;
        #[async_trait::async_trait]
        impl ChatGateway for Never {
            async fn chat(
                &self,
                _req: ChatRequest,
            ) -> Result<crate::gateway::ChatResponse, crate::gateway::ProviderError> {
                Err(crate::gateway::ProviderError::network("unused"))
            }
        }

        let mut router = ModelRouter::new("base");
        router.pin_role("critic", "critic-model");
        let fallbacks = vec!["fb-1".to_string(), "base".to_string()];
        let chain = ModelChain::new(&Never, &router, &fallbacks);
        assert_eq!(
            chain.candidates(AgentRole::Critic, None),
            vec!["critic-model", "base", "fb-1"]
        );
        assert_eq!(
            chain.candidates(AgentRole::Planner, None),
            vec!["base", "fb-1"]
        );
    }
}
