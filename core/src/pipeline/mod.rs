//! Pre-Pipeline: one fused classification + rewrite + fact-extraction pass
//! over a user message, replacing three sequential model calls. Falls back
//! to a deterministic heuristic (grounded in the kind of confidence-scored
//! regex matching a fact extractor would use) when the model call fails or
//! the message is trivially short.

use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};

/// The closed set of categories the Router dispatches on. Anything the
/// model or the heuristic produces outside this set coerces to
/// `general_chat`.
pub const CATEGORIES: &[&str] = &[
    "coding",
    "debugging",
    "math",
    "research",
    "web_search",
    "general_chat",
    "skill_writing",
    "agentic_task",
    "error_recovery",
    "planning",
    "data_analysis",
    "creative_writing",
    "reflection",
    "reminder",
    "preference",
    "identity",
    "constraint",
    "correction",
    "project_context",
    "goal",
    "small_talk",
    "unknown",
];

/// Output of the Pre-Pipeline; also the input to the Router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category: String,
    pub confidence: f32,
    pub needs_tools: bool,
    pub rewritten: String,
    pub facts: Vec<String>,
    #[serde(rename = "_source")]
    pub source: IntentSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentSource {
    Llm,
    Heuristic,
}

/// One fact+category heuristic rule, confidence-scored the way a fallback
/// extractor weighs pattern strength.
struct HeuristicRule {
    pattern: Regex,
    category: &'static str,
    confidence: f32,
}

fn build_heuristic_rules() -> Vec<HeuristicRule> {
    let rule = |pattern: &str, category: &'static str, confidence: f32| HeuristicRule {
        pattern: Regex::new(pattern).expect("static heuristic pattern must compile"),
        category,
        confidence,
    };

    vec![
        rule(r"(?i)\b(fn|function|class|impl|struct|import|compile|syntax)\b", "coding", 0.8),
        rule(r"(?i)\b(error|exception|stack trace|panic|traceback|doesn't work|failing)\b", "debugging", 0.8),
        rule(r"(?i)\b(\d+\s*[+\-*/]\s*\d+|equation|solve for|derivative|integral)\b", "math", 0.75),
        rule(r"(?i)\b(search the web|look up|google|find articles about)\b", "web_search", 0.85),
        rule(r"(?i)\b(research|investigate|compare options|literature on)\b", "research", 0.7),
        rule(r"(?i)\b(write a skill|new skill|register a tool)\b", "skill_writing", 0.85),
        rule(r"(?i)\b(remind me|don't forget|at \d{1,2}(:\d{2})?\s*(am|pm)?)\b", "reminder", 0.75),
        rule(r"(?i)\b(i prefer|i like|i hate|i'd rather)\b", "preference", 0.7),
        rule(r"(?i)\b(my name is|i am a|i work as|i live in)\b", "identity", 0.7),
        rule(r"(?i)\b(never do|always do|must not|only use)\b", "constraint", 0.7),
        rule(r"(?i)\b(no,? that's wrong|actually i meant|correction:)\b", "correction", 0.75),
        rule(r"(?i)\b(plan|step by step|roadmap|schedule this)\b", "planning", 0.65),
        rule(r"(?i)\b(write a (story|poem|song))\b", "creative_writing", 0.75),
    ]
}

/// One fused model call for classify + rewrite + fact-extraction, with a
/// one-slot memoisation cache and a deterministic heuristic fallback.
pub struct PrePipeline {
    llm: std::sync::Arc<LlmClient>,
    model_id: String,
    heuristics: Vec<HeuristicRule>,
    cache: Mutex<Option<(String, Intent)>>,
}

impl PrePipeline {
    pub fn new(llm: std::sync::Arc<LlmClient>, model_id: impl Into<String>) -> Self {
        Self {
            llm,
            model_id: model_id.into(),
            heuristics: build_heuristic_rules(),
            cache: Mutex::new(None),
        }
    }

    /// Runs the fused classify/rewrite/extract pass. Idempotent: calling
    /// twice with the same input in the same turn returns the identical
    /// object via a one-slot cache.
    pub async fn process(&self, message: &str) -> Intent {
        if let Some((cached_input, cached_intent)) = self.cache.lock().unwrap().clone() {
            if cached_input == message {
                return cached_intent;
            }
        }

        let intent = if message.split_whitespace().count() <= 3 {
            self.heuristic_intent(message)
        } else {
            match self.llm_intent(message).await {
                Ok(intent) => intent,
                Err(_) => self.heuristic_intent(message),
            }
        };

        let intent = validate_intent(intent, message);
        *self.cache.lock().unwrap() = Some((message.to_string(), intent.clone()));
        intent
    }

    async fn llm_intent(&self, message: &str) -> Result<Intent> {
        let truncated: String = message.chars().take(400).collect();
        let prompt = format!(
            "Classify the user message and extract facts. Respond with a single JSON object \
             with fields category, confidence (0-1), needs_tools (bool), rewritten (string), \
             facts (array of strings). Allowed categories: {}.\n\nMessage: {}",
            CATEGORIES.join(", "),
            truncated
        );

        let response = self
            .llm
            .chat(
                &self.model_id,
                &[ChatMessage::system(
                    "You are a fast intent classifier for a personal assistant. Reply with JSON only.",
                ), ChatMessage::user(prompt)],
                ChatOptions { max_tokens: 300, temperature: 0.0, ..ChatOptions::default() },
                &tokio_util::sync::CancellationToken::new(),
            )
            .await?;

        let parsed: Intent = serde_json::from_str(response.content.trim())
            .map(|mut intent: Intent| {
                intent.source = IntentSource::Llm;
                intent
            })
            .map_err(crate::error::HearthError::from)?;
        Ok(parsed)
    }

    fn heuristic_intent(&self, message: &str) -> Intent {
        let category = self
            .heuristics
            .iter()
            .find(|rule| rule.pattern.is_match(message))
            .map(|rule| rule.category)
            .unwrap_or("general_chat");

        Intent {
            category: category.to_string(),
            confidence: self
                .heuristics
                .iter()
                .find(|rule| rule.category == category)
                .map(|rule| rule.confidence)
                .unwrap_or(0.5),
            needs_tools: category == "web_search" || category == "agentic_task",
            rewritten: message.to_string(),
            facts: Vec::new(),
            source: IntentSource::Heuristic,
        }
    }
}

/// Unknown categories coerce to `general_chat`; an empty or wildly expanded
/// rewrite falls back to the original message; `facts` must be a list
/// (already enforced by the type).
fn validate_intent(mut intent: Intent, original: &str) -> Intent {
    if !CATEGORIES.contains(&intent.category.as_str()) {
        intent.category = "general_chat".to_string();
    }
    if intent.rewritten.is_empty() || intent.rewritten.len() > original.len() * 5 {
        intent.rewritten = original.to_string();
    }
    intent.confidence = intent.confidence.clamp(0.0, 1.0);
    intent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> PrePipeline {
        PrePipeline::new(std::sync::Arc::new(LlmClient::new(vec![])), "unused")
    }

    #[tokio::test]
    async fn short_message_skips_model_call() {
        let pipeline = pipeline();
        let intent = pipeline.process("hi there").await;
        assert_eq!(intent.source, IntentSource::Heuristic);
        assert_eq!(intent.rewritten, "hi there");
        assert!(intent.facts.is_empty());
    }

    #[tokio::test]
    async fn pipeline_is_idempotent_within_a_turn() {
        let pipeline = pipeline();
        let first = pipeline.process("search the web for rust async runtimes").await;
        let second = pipeline.process("search the web for rust async runtimes").await;
        assert_eq!(first.category, second.category);
        assert_eq!(first.rewritten, second.rewritten);
    }

    #[tokio::test]
    async fn heuristic_classifies_debugging_keywords() {
        let pipeline = pipeline();
        let intent = pipeline
            .process("I'm getting a stack trace when I run this, it keeps failing")
            .await;
        assert_eq!(intent.category, "debugging");
    }

    #[test]
    fn validate_intent_coerces_unknown_category() {
        let intent = Intent {
            category: "not_a_real_category".to_string(),
            confidence: 0.9,
            needs_tools: false,
            rewritten: "hello".to_string(),
            facts: vec![],
            source: IntentSource::Llm,
        };
        let validated = validate_intent(intent, "hello");
        assert_eq!(validated.category, "general_chat");
    }

    #[test]
    fn validate_intent_rejects_oversized_rewrite() {
        let intent = Intent {
            category: "general_chat".to_string(),
            confidence: 0.5,
            needs_tools: false,
            rewritten: "x".repeat(1000),
            facts: vec![],
            source: IntentSource::Llm,
        };
        let validated = validate_intent(intent, "short");
        assert_eq!(validated.rewritten, "short");
    }
}
