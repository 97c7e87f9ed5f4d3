//! Role-based model routing with a single-hop fallback.
//!
//! Each persona role maps to one of three fixed role classes, each backed
//! by a model tier and sampling temperature. The roster is resolved once at
//! construction: if a local-inference tier fails its one-time reachability
//! probe, the fallback tier permanently substitutes for it. After that the
//! routing table is immutable; there is no per-call re-probe.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::client::{CompletionClient, CompletionRequest, LOCAL_MODEL_PREFIX};
use crate::errors::RouterError;

/// Token budget for every completion call.
const MAX_COMPLETION_TOKENS: u32 = 4000;

/// The three fixed role classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClass {
    /// High-reasoning: planning, plan review, final audit.
    Reasoning,
    /// High-skill, low-cost: code and test generation, debugging.
    Skilled,
    /// Fast, low-cost: everything else.
    Fast,
}

impl RoleClass {
    pub fn classify(role: &str) -> Self {
        match role {
            "Architect" | "Validator" | "Auditor" => RoleClass::Reasoning,
            "Coder" | "QA" | "Debugger" | "Refactor" => RoleClass::Skilled,
            _ => RoleClass::Fast,
        }
    }

    fn temperature(&self) -> f32 {
        match self {
            RoleClass::Reasoning => 0.1,
            RoleClass::Skilled => 0.2,
            RoleClass::Fast => 0.0,
        }
    }
}

/// Model ids per role class, plus the uniform fallback tier.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRoster {
    pub reasoning: String,
    pub skilled: String,
    pub fast: String,
    pub fallback: String,
}

impl Default for ModelRoster {
    fn default() -> Self {
        Self {
            reasoning: "gpt-4o".to_string(),
            skilled: "ollama/qwen2.5-coder:14b".to_string(),
            fast: "ollama/llama3.2".to_string(),
            fallback: "gpt-4o-mini".to_string(),
        }
    }
}

impl ModelRoster {
    fn has_local_tier(&self) -> bool {
        [&self.reasoning, &self.skilled, &self.fast]
            .iter()
            .any(|m| m.starts_with(LOCAL_MODEL_PREFIX))
    }

    /// Replace every local tier with the fallback tier.
    fn without_local_tiers(mut self) -> Self {
        for tier in [&mut self.reasoning, &mut self.skilled, &mut self.fast] {
            if tier.starts_with(LOCAL_MODEL_PREFIX) {
                *tier = self.fallback.clone();
            }
        }
        self
    }
}

/// Immutable routing configuration constructed once per process.
pub struct ModelRouter {
    client: Arc<dyn CompletionClient>,
    roster: ModelRoster,
}

impl ModelRouter {
    /// Build the router, probing the local endpoint once if the roster
    /// references it. A failed probe permanently substitutes the fallback
    /// tier for every local class.
    pub async fn connect(client: Arc<dyn CompletionClient>, roster: ModelRoster) -> Self {
        let roster = if roster.has_local_tier() {
            if client.probe_local().await {
                info!("local inference endpoint is reachable");
                roster
            } else {
                warn!(
                    fallback = %roster.fallback,
                    "local inference endpoint unreachable, substituting fallback tier"
                );
                roster.without_local_tiers()
            }
        } else {
            roster
        };
        Self { client, roster }
    }

    /// The resolved model id for a role, after any probe substitution.
    pub fn model_for(&self, role: &str) -> &str {
        match RoleClass::classify(role) {
            RoleClass::Reasoning => &self.roster.reasoning,
            RoleClass::Skilled => &self.roster.skilled,
            RoleClass::Fast => &self.roster.fast,
        }
    }

    /// Route one completion. On a primary-tier failure, retry exactly once
    /// against the designated fallback tier regardless of role; surface
    /// [`RouterError::Exhausted`] only when both fail.
    pub async fn generate(
        &self,
        role: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RouterError> {
        let class = RoleClass::classify(role);
        let model = self.model_for(role).to_string();
        let req = CompletionRequest {
            model: model.clone(),
            system: system_prompt.to_string(),
            user: user_prompt.to_string(),
            temperature: class.temperature(),
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        match self.client.complete(&req).await {
            Ok(text) => Ok(text),
            Err(primary_err) => {
                warn!(role, model = %model, error = %primary_err, "primary tier failed, retrying on fallback");
                let fallback_req = CompletionRequest {
                    model: self.roster.fallback.clone(),
                    ..req
                };
                self.client
                    .complete(&fallback_req)
                    .await
                    .map_err(|fallback_err| RouterError::Exhausted {
                        role: role.to_string(),
                        tier: model,
                        fallback: self.roster.fallback.clone(),
                        detail: format!("{:#}; fallback: {:#}", primary_err, fallback_err),
                    })
            }
        }
    }
}
