//! Router: the pure function `intent -> RouteDecision`.
//!
//! Implements dynamic/escalation mode (the alternative to a static
//! category->model map, see `DESIGN.md` for why this mode was chosen): the
//! router picks a smaller candidate plus an escalation target, and the
//! Executor escalates only if the model's own reply asks for it via the
//! `ESCALATE:` sentinel.

use serde::{Deserialize, Serialize};

/// Categories that bypass the smaller model entirely — perfect-code work
/// where a wrong first attempt is expensive to recover from.
pub const ALWAYS_LARGE: &[&str] = &["skill_writing", "error_recovery"];

/// Categories that never escalate, regardless of what the model's reply
/// contains — chat-like turns where a larger model wouldn't improve the
/// answer enough to justify the latency.
pub const NEVER_LARGE: &[&str] = &["general_chat", "small_talk"];

/// Categories whose token budget is bumped up even at a lower tier because
/// the expected output is long-form.
pub const EXPANSIVE: &[&str] = &[
    "skill_writing",
    "coding",
    "research",
    "planning",
    "debugging",
    "agentic_task",
    "data_analysis",
    "creative_writing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[serde(rename = "3b")]
    Small,
    #[serde(rename = "3b_with_escalation")]
    SmallWithEscalation,
    #[serde(rename = "8b")]
    Medium,
    #[serde(rename = "8b_with_escalation")]
    MediumWithEscalation,
    #[serde(rename = "14b_direct")]
    LargeDirect,
}

impl Tier {
    fn base_token_budget(self) -> usize {
        match self {
            Tier::Small | Tier::SmallWithEscalation => 1500,
            Tier::Medium | Tier::MediumWithEscalation => 3000,
            Tier::LargeDirect => 6000,
        }
    }

    fn context_window(self) -> usize {
        match self {
            Tier::Small | Tier::SmallWithEscalation => 8_192,
            Tier::Medium | Tier::MediumWithEscalation => 32_768,
            Tier::LargeDirect => 128_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub model_id: String,
    pub escalation_target: Option<String>,
    pub tier: Tier,
    pub token_budget: usize,
    pub context_window: usize,
    /// Ordered list of substitute models to try when the preferred one
    /// fails with OOM or an ineligible response, already filtered to the
    /// models the gateway reports as installed.
    pub fallback_chain: Vec<String>,
}

/// One model per size class, plus the ordered fallback preference within
/// each class. Supplied at startup from the gateway's installed-model list
/// (`LlmClient::list_models()`), so a deployment missing the large model
/// simply never escalates.
#[derive(Debug, Clone)]
pub struct RouterModels {
    pub small: String,
    pub medium: String,
    pub large: String,
    /// Fallback preference order, most to least preferred, before
    /// filtering to what's installed.
    pub fallback_preference: Vec<String>,
}

pub struct Router {
    models: RouterModels,
    installed: Vec<String>,
}

impl Router {
    pub fn new(models: RouterModels, installed: Vec<String>) -> Self {
        Self { models, installed }
    }

    /// Pure function: `intent -> RouteDecision`. `background` pins to the
    /// smallest tier regardless of category, per the heartbeat's
    /// always-cheap policy.
    pub fn route(&self, category: &str, background: bool) -> RouteDecision {
        if background {
            return self.decision_for(Tier::Small, &self.models.small, None, category);
        }

        if ALWAYS_LARGE.contains(&category) {
            return self.decision_for(Tier::LargeDirect, &self.models.large, None, category);
        }

        if NEVER_LARGE.contains(&category) {
            return self.decision_for(Tier::Small, &self.models.small, None, category);
        }

        // Default dynamic/escalation path: small model first, escalate to
        // large only if the model itself asks for it.
        self.decision_for(
            Tier::SmallWithEscalation,
            &self.models.small,
            Some(self.models.large.clone()),
            category,
        )
    }

    fn decision_for(
        &self,
        tier: Tier,
        model_id: &str,
        escalation_target: Option<String>,
        category: &str,
    ) -> RouteDecision {
        let mut token_budget = tier.base_token_budget();
        if EXPANSIVE.contains(&category) {
            token_budget = token_budget.max(Tier::Medium.base_token_budget());
        }

        RouteDecision {
            model_id: model_id.to_string(),
            escalation_target,
            tier,
            token_budget,
            context_window: tier.context_window(),
            fallback_chain: self.fallback_chain_for(model_id),
        }
    }

    /// The preferred fallback order, filtered to installed models and with
    /// the preferred model itself removed.
    fn fallback_chain_for(&self, preferred: &str) -> Vec<String> {
        self.models
            .fallback_preference
            .iter()
            .filter(|m| m.as_str() != preferred)
            .filter(|m| self.installed.contains(m))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        let models = RouterModels {
            small: "small-3b".to_string(),
            medium: "medium-8b".to_string(),
            large: "large-14b".to_string(),
            fallback_preference: vec![
                "large-14b".to_string(),
                "medium-8b".to_string(),
                "small-3b".to_string(),
            ],
        };
        Router::new(models, vec!["small-3b".to_string(), "medium-8b".to_string(), "large-14b".to_string()])
    }

    #[test]
    fn always_large_categories_bypass_the_small_model() {
        let decision = router().route("skill_writing", false);
        assert_eq!(decision.model_id, "large-14b");
        assert_eq!(decision.tier, Tier::LargeDirect);
        assert!(decision.escalation_target.is_none());
    }

    #[test]
    fn never_large_categories_never_carry_an_escalation_target() {
        let decision = router().route("general_chat", false);
        assert_eq!(decision.model_id, "small-3b");
        assert!(decision.escalation_target.is_none());
    }

    #[test]
    fn default_category_escalates_from_small_to_large() {
        let decision = router().route("web_search", false);
        assert_eq!(decision.model_id, "small-3b");
        assert_eq!(decision.escalation_target.as_deref(), Some("large-14b"));
        assert_eq!(decision.tier, Tier::SmallWithEscalation);
    }

    #[test]
    fn background_work_pins_to_the_smallest_tier_regardless_of_category() {
        let decision = router().route("skill_writing", true);
        assert_eq!(decision.model_id, "small-3b");
        assert_eq!(decision.tier, Tier::Small);
    }

    #[test]
    fn expansive_categories_get_a_larger_token_budget_even_at_a_low_tier() {
        let decision = router().route("coding", false);
        assert!(decision.token_budget >= Tier::Medium.base_token_budget());
    }

    #[test]
    fn fallback_chain_is_filtered_to_installed_models() {
        let models = RouterModels {
            small: "small-3b".to_string(),
            medium: "medium-8b".to_string(),
            large: "large-14b".to_string(),
            fallback_preference: vec!["large-14b".to_string(), "medium-8b".to_string()],
        };
        // "large-14b" is not installed in this deployment.
        let router = Router::new(models, vec!["small-3b".to_string(), "medium-8b".to_string()]);
        let decision = router.route("general_chat", false);
        assert_eq!(decision.fallback_chain, vec!["medium-8b".to_string()]);
    }
}
