//! Agentic Executor: drives a model through alternating reasoning and skill
//! calls until it produces a `FINAL` answer, asks to `ESCALATE`, or exhausts
//! its tool-call budget. Owns retry-on-validation-failure and OOM fallback;
//! the Heartbeat and the chat endpoint are both just callers of `run()`.

pub mod history;
pub mod parser;
pub mod validation;

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigManager;
use crate::error::{HearthError, Result};
use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage};
use crate::router::RouteDecision;
use crate::skills::SkillRegistry;
use crate::store::Priority;

/// Events emitted mid-turn for a caller that wants to narrate progress
/// (streamed to the chat SSE endpoint, or just dropped by the heartbeat).
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Thinking(String),
    Token(String),
    SkillCall { name: String },
}

/// Everything one call to `run()` needs to know about the turn.
pub struct TurnRequest {
    pub route: RouteDecision,
    pub category: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// `true` for heartbeat-driven turns: pins the smallest model, a tight
    /// token budget, and a 1-attempt validation-retry budget, and enables
    /// `NEW_TASKS:` parsing after the final answer.
    pub background: bool,
}

/// One task the model asked to be appended to the queue, parsed out of a
/// background turn's `NEW_TASKS: [...]` trailer.
#[derive(Debug, Clone)]
pub struct NewTaskSpec {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub success: bool,
    pub output: String,
    pub model_used: String,
    pub tool_calls: u32,
    pub thinking: Vec<String>,
    pub new_tasks: Vec<NewTaskSpec>,
}

pub struct TurnContext {
    pub cancel: CancellationToken,
    pub events: Option<broadcast::Sender<ExecutorEvent>>,
    /// `true` for heartbeat-driven turns: draws from the rate limiter's
    /// shared worker quota instead of the main-agent quota.
    pub is_worker: bool,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, events: None, is_worker: false }
    }

    pub fn with_events(cancel: CancellationToken, events: broadcast::Sender<ExecutorEvent>) -> Self {
        Self { cancel, events: Some(events), is_worker: false }
    }

    pub fn for_worker(cancel: CancellationToken) -> Self {
        Self { cancel, events: None, is_worker: true }
    }
}

enum RunOnceResult {
    Final {
        output: String,
        tool_calls: u32,
        thinking: Vec<String>,
        new_tasks: Vec<NewTaskSpec>,
    },
    Escalate {
        reason: String,
        tool_calls: u32,
    },
    /// The tool-call budget ran out before a `FINAL:`/`ESCALATE:` directive
    /// appeared. `output` is already the best-effort extraction from the
    /// last reply — `run()` returns it as-is rather than retrying it
    /// through `validate_output`.
    BudgetExhausted {
        output: String,
        tool_calls: u32,
        thinking: Vec<String>,
    },
}

pub struct Executor {
    llm: Arc<LlmClient>,
    skills: Arc<SkillRegistry>,
    config: Arc<ConfigManager>,
}

impl Executor {
    pub fn new(llm: Arc<LlmClient>, skills: Arc<SkillRegistry>, config: Arc<ConfigManager>) -> Self {
        Self { llm, skills, config }
    }

    /// Runs one logical turn to completion: retries on validation failure
    /// with a different model, follows OOM to the next fallback model, and
    /// follows an `ESCALATE:` signal to the route's escalation target,
    /// discarding partial history but keeping the original prompt.
    pub async fn run(&self, request: TurnRequest, ctx: &TurnContext) -> Result<TurnOutcome> {
        let cfg = self.config.get_config().await;
        let max_retries = if request.background {
            cfg.executor_max_retries_background.max(1)
        } else {
            cfg.executor_max_retries_user.max(1)
        };

        let mut model_id = request.route.model_id.clone();
        let mut escalation_target = request.route.escalation_target.clone();
        let mut fallback_chain: VecDeque<String> = request.route.fallback_chain.clone().into();
        let mut prompt = request.user_prompt.clone();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if ctx.cancel.is_cancelled() {
                return Err(HearthError::CancelledByUser);
            }

            match self.run_once(&model_id, &request, &prompt, &cfg, ctx).await {
                Ok(RunOnceResult::Final { output, tool_calls, thinking, new_tasks }) => {
                    match validation::validate_output(&request.category, &output) {
                        Ok(()) => {
                            return Ok(TurnOutcome {
                                success: true,
                                output,
                                model_used: model_id,
                                tool_calls,
                                thinking,
                                new_tasks,
                            });
                        }
                        Err(reason) if attempt < max_retries => {
                            prompt = format!(
                                "{}\n\nYour previous answer was rejected: {reason}\n\
                                 Previous answer:\n{output}\n\n\
                                 Try again, addressing the rejection reason directly.",
                                request.user_prompt
                            );
                            if let Some(next) = fallback_chain.pop_front() {
                                model_id = next;
                            }
                            continue;
                        }
                        Err(_) => {
                            return Ok(TurnOutcome {
                                success: false,
                                output,
                                model_used: model_id,
                                tool_calls,
                                thinking,
                                new_tasks,
                            });
                        }
                    }
                }
                Ok(RunOnceResult::Escalate { reason, tool_calls }) => {
                    if let Some(target) = escalation_target.take() {
                        model_id = target;
                        prompt = request.user_prompt.clone();
                        continue;
                    }
                    if let Some(next) = fallback_chain.pop_front() {
                        model_id = next;
                        prompt = request.user_prompt.clone();
                        continue;
                    }
                    return Ok(TurnOutcome {
                        success: false,
                        output: format!("escalation requested with no further model available: {reason}"),
                        model_used: model_id,
                        tool_calls,
                        thinking: Vec::new(),
                        new_tasks: Vec::new(),
                    });
                }
                Err(e) if e.is_oom() => {
                    if let Some(next) = fallback_chain.pop_front() {
                        model_id = next;
                        continue;
                    }
                    return Err(e);
                }
                Ok(RunOnceResult::BudgetExhausted { output, tool_calls, thinking }) => {
                    return Ok(TurnOutcome {
                        success: false,
                        output,
                        model_used: model_id,
                        tool_calls,
                        thinking,
                        new_tasks: Vec::new(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drives one CALL→{FINAL|SKILL|ESCALATE|nudge} loop against a single
    /// model until a terminal state or the tool-call/nudge budgets run out.
    async fn run_once(
        &self,
        model_id: &str,
        request: &TurnRequest,
        prompt: &str,
        cfg: &crate::config::Config,
        ctx: &TurnContext,
    ) -> Result<RunOnceResult> {
        let mut messages = vec![
            ChatMessage::system(request.system_prompt.clone()),
            ChatMessage::user(prompt.to_string()),
        ];
        let mut tool_calls = 0u32;
        let mut nudge_count = 0u32;
        let mut thinking = Vec::new();
        let options = ChatOptions {
            temperature: 0.3,
            max_tokens: request.route.token_budget,
            context_window: request.route.context_window,
            timeout_secs: 120,
        };

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(HearthError::CancelledByUser);
            }
            messages = history::compress_if_needed(messages, cfg.executor_history_compress_threshold);

            let response = self.call_model(model_id, &messages, options, ctx).await?;
            let (stripped, blocks) = parser::strip_thinking(&response.content);
            for block in &blocks {
                self.emit(ctx, ExecutorEvent::Thinking(block.clone()));
            }
            thinking.extend(blocks);

            match parser::parse_directive(&stripped) {
                Some(parser::Directive::Final(answer)) => {
                    // NEW_TASKS trailers are parsed regardless of `background`:
                    // the heartbeat always invites one, and a user turn may
                    // propose a follow-up (e.g. "remind me" / "look into this
                    // further") that the caller enqueues on the way out.
                    let new_tasks = parse_new_tasks(&stripped);
                    return Ok(RunOnceResult::Final { output: answer, tool_calls, thinking, new_tasks });
                }
                Some(parser::Directive::Escalate(reason)) => {
                    return Ok(RunOnceResult::Escalate { reason, tool_calls });
                }
                Some(parser::Directive::Skill(call)) => {
                    messages.push(ChatMessage::assistant(stripped));
                    tool_calls += 1;
                    self.emit(ctx, ExecutorEvent::SkillCall { name: call.name.clone() });

                    let observation = match self.skills.run(&call).await {
                        Ok(result) => {
                            let capped = cap_chars(&result, cfg.skill_result_cap_bytes);
                            format!("Skill result:\n{capped}\nContinue.")
                        }
                        Err(e) => format!("Skill error: {e}. Try another approach."),
                    };
                    messages.push(ChatMessage::user(observation));
                    nudge_count = 0;

                    if tool_calls >= cfg.executor_max_tool_calls {
                        let output = parser::extract_best_output(&response.content);
                        return Ok(RunOnceResult::BudgetExhausted { output, tool_calls, thinking });
                    }
                }
                None => {
                    messages.push(ChatMessage::assistant(stripped));
                    nudge_count += 1;

                    if nudge_count >= cfg.executor_max_nudges {
                        messages.push(ChatMessage::user(
                            "Output FINAL: your best answer now.".to_string(),
                        ));
                        let response = self.call_model(model_id, &messages, options, ctx).await?;
                        let (stripped, blocks) = parser::strip_thinking(&response.content);
                        thinking.extend(blocks);
                        let answer = match parser::parse_directive(&stripped) {
                            Some(parser::Directive::Final(answer)) => answer,
                            _ => stripped.trim().to_string(),
                        };
                        let new_tasks = parse_new_tasks(&answer);
                        return Ok(RunOnceResult::Final { output: answer, tool_calls, thinking, new_tasks });
                    }

                    messages.push(ChatMessage::user(
                        "Please continue: respond with SKILL:, FINAL:, or ESCALATE:.".to_string(),
                    ));
                }
            }
        }
    }

    /// Streams the model's reply token by token, forwarding each token
    /// through `ctx.events` if present, and returns the accumulated
    /// response for directive parsing.
    async fn call_model(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
        ctx: &TurnContext,
    ) -> Result<ChatResponse> {
        self.config
            .check_rate_limit(ctx.is_worker, options.max_tokens as u32)
            .await
            .map_err(|e| HearthError::RateLimitExceeded { limit_type: e.to_string() })?;

        let mut stream = Box::pin(self.llm.chat_stream(model_id, messages, options));
        let mut content = String::new();
        while let Some(item) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return Err(HearthError::CancelledByUser);
            }
            let token = item?;
            content.push_str(&token);
            self.emit(ctx, ExecutorEvent::Token(token));
        }
        Ok(ChatResponse {
            content,
            usage: TokenUsage::default(),
            model: model_id.to_string(),
        })
    }

    fn emit(&self, ctx: &TurnContext, event: ExecutorEvent) {
        if let Some(tx) = &ctx.events {
            let _ = tx.send(event);
        }
    }
}

/// Caps `s` at `cap` characters (a generous stand-in for the byte cap; skill
/// output is almost always ASCII), appending a truncation marker.
fn cap_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        return s.to_string();
    }
    let mut out: String = s.chars().take(cap).collect();
    out.push_str("\n...[truncated]");
    out
}

/// Parses a trailing `NEW_TASKS: [...]` JSON array out of a background
/// turn's final answer. Absent or malformed is not an error — it just means
/// no tasks were proposed this tick.
fn parse_new_tasks(text: &str) -> Vec<NewTaskSpec> {
    #[derive(serde::Deserialize)]
    struct RawTask {
        title: String,
        description: String,
        #[serde(default)]
        priority: Option<String>,
    }

    let Some(pos) = text.find("NEW_TASKS:") else {
        return Vec::new();
    };
    let after = text[pos + "NEW_TASKS:".len()..].trim();
    let raw: Vec<RawTask> = match serde_json::from_str(after) {
        Ok(tasks) => tasks,
        Err(_) => return Vec::new(),
    };

    raw.into_iter()
        .map(|t| NewTaskSpec {
            title: t.title,
            description: t.description,
            priority: t
                .priority
                .and_then(|p| p.parse().ok())
                .unwrap_or(Priority::Normal),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmProvider, ModelSpec};
    use crate::router::Tier;

    fn route(model: &str) -> RouteDecision {
        RouteDecision {
            model_id: model.to_string(),
            escalation_target: None,
            tier: Tier::Small,
            token_budget: 512,
            context_window: 8192,
            fallback_chain: Vec::new(),
        }
    }

    async fn executor_with_unreachable_model() -> Executor {
        let llm = Arc::new(LlmClient::new(vec![ModelSpec {
            id: "small".to_string(),
            provider: LlmProvider::OpenAiCompatible,
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: None,
        }]));
        let skills = Arc::new(SkillRegistry::new(
            std::env::temp_dir().join("hearth-executor-test-skills"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGENT_HOME", dir.path());
        let config = ConfigManager::new().await.unwrap();
        std::env::remove_var("AGENT_HOME");
        Executor::new(llm, skills, config)
    }

    #[test]
    fn cap_chars_truncates_with_a_marker() {
        let capped = cap_chars(&"x".repeat(100), 10);
        assert!(capped.starts_with(&"x".repeat(10)));
        assert!(capped.contains("truncated"));
    }

    #[test]
    fn cap_chars_leaves_short_strings_alone() {
        assert_eq!(cap_chars("short", 100), "short");
    }

    #[test]
    fn parse_new_tasks_reads_a_trailing_json_array() {
        let text = r#"Done with setup.
NEW_TASKS: [{"title": "Follow up", "description": "check back tomorrow", "priority": "low"}]"#;
        let tasks = parse_new_tasks(text);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Follow up");
        assert_eq!(tasks[0].priority, Priority::Low);
    }

    #[test]
    fn parse_new_tasks_defaults_priority_to_normal() {
        let text = r#"NEW_TASKS: [{"title": "Follow up", "description": "no priority given"}]"#;
        let tasks = parse_new_tasks(text);
        assert_eq!(tasks[0].priority, Priority::Normal);
    }

    #[test]
    fn parse_new_tasks_absent_marker_returns_empty() {
        assert!(parse_new_tasks("FINAL: nothing to add").is_empty());
    }

    #[tokio::test]
    async fn unreachable_model_with_empty_fallback_chain_surfaces_an_error() {
        let executor = executor_with_unreachable_model().await;
        let request = TurnRequest {
            route: route("small"),
            category: "general_chat".to_string(),
            system_prompt: "you are a test assistant".to_string(),
            user_prompt: "hello".to_string(),
            background: false,
        };
        let ctx = TurnContext::new(CancellationToken::new());
        let result = executor.run(request, &ctx).await;
        assert!(result.is_err());
    }
}
