//! Heartbeat Scheduler: the single long-running cooperative loop that
//! claims due tasks from the Task Store, drives them through the Agentic
//! Executor with the background model and a tight budget, and broadcasts
//! status events to subscribers. It is the only component that consumes
//! tasks, and it yields to user activity via an explicit pause signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigManager;
use crate::error::{HearthError, Result};
use crate::executor::{Executor, TurnContext, TurnRequest};
use crate::router::Router;
use crate::store::{Priority, Task, TaskStore, TaskType};

/// Background system prompt handed to every heartbeat-driven turn. Kept
/// short and stable — the heartbeat's model never sees the user's
/// personality configuration, only its own task description.
const BACKGROUND_SYSTEM_PROMPT: &str = "You are the background worker of a personal assistant. \
You work through queued tasks autonomously. Respond using SKILL:, FINAL:, or ESCALATE: as \
instructed. When you finish, end your FINAL answer with an optional \
NEW_TASKS: [{\"title\": ..., \"description\": ..., \"priority\": ...}] line proposing follow-up work.";

/// Event types broadcast on every meaningful heartbeat transition. Each
/// variant serializes with a `heartbeat_` prefix (`heartbeat_working`,
/// `heartbeat_task_done`, …) so the wire `type` field and the `/events` SSE
/// event name are unambiguous alongside event names from other sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatEventType {
    #[serde(rename = "heartbeat_paused")]
    Paused,
    #[serde(rename = "heartbeat_resuming")]
    Resuming,
    #[serde(rename = "heartbeat_idle")]
    Idle,
    #[serde(rename = "heartbeat_working")]
    Working,
    #[serde(rename = "heartbeat_skill_call")]
    SkillCall,
    #[serde(rename = "heartbeat_task_done")]
    TaskDone,
    #[serde(rename = "heartbeat_task_failed")]
    TaskFailed,
    #[serde(rename = "heartbeat_task_added")]
    TaskAdded,
    #[serde(rename = "heartbeat_reflecting")]
    Reflecting,
    #[serde(rename = "heartbeat_tasks_generated")]
    TasksGenerated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    #[serde(rename = "type")]
    pub event_type: HeartbeatEventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub task_title: Option<String>,
    pub task_type: Option<String>,
}

/// What one claimed-task execution produced, surfaced mainly for tests and
/// for an operator-facing log line — `tick()` itself only needs to know
/// whether to keep going.
#[derive(Debug, Clone)]
pub struct RunTaskOutcome {
    pub completed: bool,
    /// Set when the task execution was cut short by a user pre-emption; the
    /// text always contains `HearthError::CancelledByUser`'s user-facing
    /// message ("Task paused.").
    pub partial: Option<String>,
}

/// The Heartbeat Scheduler. One logical worker; `start()` runs until
/// `stop()` is called. Shares the Task Store and Model Gateway with the
/// request-serving path — see the crate's concurrency notes for the
/// ordering guarantees both sides rely on.
pub struct Heartbeat {
    store: Arc<TaskStore>,
    executor: Arc<Executor>,
    router: Arc<Router>,
    config: Arc<ConfigManager>,
    events: broadcast::Sender<HeartbeatEvent>,
    paused_indefinitely: AtomicBool,
    pause_until: Mutex<Option<DateTime<Utc>>>,
    current_turn_cancel: Mutex<Option<CancellationToken>>,
    stop_signal: CancellationToken,
}

impl Heartbeat {
    pub fn new(
        store: Arc<TaskStore>,
        executor: Arc<Executor>,
        router: Arc<Router>,
        config: Arc<ConfigManager>,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        Arc::new(Self {
            store,
            executor,
            router,
            config,
            events,
            paused_indefinitely: AtomicBool::new(false),
            pause_until: Mutex::new(None),
            current_turn_cancel: Mutex::new(None),
            stop_signal: CancellationToken::new(),
        })
    }

    /// A fresh receiver onto the broadcast sink; each connected `/events`
    /// subscriber gets its own bounded queue via `tokio_stream`.
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    /// Waits the fixed startup delay, then ticks forever on the configured
    /// period until `stop()` is called.
    pub async fn start(self: Arc<Self>) {
        let startup_delay = self.config.get_config().await.heartbeat_startup_delay_secs;
        tokio::select! {
            _ = sleep(Duration::from_secs(startup_delay)) => {}
            _ = self.stop_signal.cancelled() => return,
        }

        loop {
            if self.stop_signal.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "heartbeat tick failed");
            }

            let period = self.config.get_config().await.heartbeat_tick_secs;
            tokio::select! {
                _ = sleep(Duration::from_secs(period)) => {}
                _ = self.stop_signal.cancelled() => break,
            }
        }
    }

    /// Exits the loop after the current iteration completes.
    pub fn stop(&self) {
        self.stop_signal.cancel();
    }

    /// Sets an indefinite pause flag, cancels any in-flight turn at its next
    /// suspension point, and atomically returns any running task row to
    /// pending. Happens-before any new model invocation the heartbeat would
    /// otherwise start.
    pub fn pause_for_user(&self) {
        self.paused_indefinitely.store(true, Ordering::SeqCst);
        if let Some(cancel) = self.current_turn_cancel.lock().clone() {
            cancel.cancel();
        }
        self.emit(HeartbeatEventType::Paused, "paused for user activity", None, None);

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.pause_running().await {
                warn!(error = %e, "pause_running failed");
            }
        });
    }

    /// Clears the indefinite pause and opens a 30s grace window during which
    /// ticks still treat the scheduler as paused — guarantees no tick
    /// proceeds until `now >= pause_until`.
    pub async fn resume_after_user(&self) {
        let grace = self.config.get_config().await.heartbeat_pause_grace_secs;
        *self.pause_until.lock() = Some(Utc::now() + ChronoDuration::seconds(grace as i64));
        self.paused_indefinitely.store(false, Ordering::SeqCst);
        self.emit(HeartbeatEventType::Resuming, "resuming after user activity", None, None);
    }

    fn is_paused(&self) -> bool {
        if self.paused_indefinitely.load(Ordering::SeqCst) {
            return true;
        }
        match *self.pause_until.lock() {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    /// One iteration of the scheduling loop: pause check, then claim-or-
    /// reflect-or-idle.
    async fn tick(&self) -> Result<()> {
        if self.is_paused() {
            self.emit(HeartbeatEventType::Idle, "paused", None, None);
            return Ok(());
        }

        match self.store.next_pending().await? {
            Some(task) => {
                self.run_task(task).await?;
            }
            None if self.store.pending_count().await? == 0 => {
                self.reflect().await?;
            }
            None => {
                self.emit(HeartbeatEventType::Idle, "nothing eligible yet", None, None);
            }
        }
        Ok(())
    }

    /// Claims, runs, and resolves one task. A user pre-emption mid-turn is
    /// not treated as a failure: `pause_running()` has already returned the
    /// row to pending, so `complete`/`fail` on it become no-ops and we just
    /// record the partial result for the caller.
    async fn run_task(&self, task: Task) -> Result<RunTaskOutcome> {
        self.store.start(task.id).await?;
        self.emit(
            HeartbeatEventType::Working,
            format!("working on \"{}\"", task.title),
            Some(task.title.clone()),
            Some(task.task_type.to_string()),
        );

        let category = category_for(task.task_type);
        let route = self.router.route(category, true);
        let request = TurnRequest {
            route,
            category: category.to_string(),
            system_prompt: BACKGROUND_SYSTEM_PROMPT.to_string(),
            user_prompt: format!("{}\n\n{}", task.title, task.description),
            background: true,
        };

        let cancel = CancellationToken::new();
        *self.current_turn_cancel.lock() = Some(cancel.clone());
        let ctx = TurnContext::for_worker(cancel);
        let task_timeout = Duration::from_secs(self.config.get_config().await.heartbeat_task_timeout_secs);

        let run_result = timeout(task_timeout, self.executor.run(request, &ctx)).await;
        *self.current_turn_cancel.lock() = None;

        match run_result {
            Ok(Ok(outcome)) => {
                if outcome.success {
                    self.store.complete(task.id, &outcome.output).await?;
                    self.emit(
                        HeartbeatEventType::TaskDone,
                        format!("completed \"{}\"", task.title),
                        Some(task.title.clone()),
                        Some(task.task_type.to_string()),
                    );
                } else {
                    self.store.fail(task.id, &outcome.output).await?;
                    self.emit(
                        HeartbeatEventType::TaskFailed,
                        format!("failed \"{}\"", task.title),
                        Some(task.title.clone()),
                        Some(task.task_type.to_string()),
                    );
                }
                for new_task in &outcome.new_tasks {
                    let new_id = self
                        .store
                        .add(
                            &new_task.title,
                            &new_task.description,
                            TaskType::Custom,
                            new_task.priority,
                            None,
                            Vec::new(),
                            HashMap::new(),
                            Some(task.id),
                            self.config.get_config().await.task_default_max_retries,
                        )
                        .await?;
                    info!(task_id = new_id, "follow-up task appended by the background worker");
                    self.emit(
                        HeartbeatEventType::TaskAdded,
                        format!("added \"{}\"", new_task.title),
                        Some(new_task.title.clone()),
                        None,
                    );
                }
                Ok(RunTaskOutcome { completed: outcome.success, partial: None })
            }
            Ok(Err(HearthError::CancelledByUser)) => {
                let message = HearthError::CancelledByUser.user_message();
                info!(task_id = task.id, "task execution cancelled by user pre-emption");
                Ok(RunTaskOutcome { completed: false, partial: Some(message) })
            }
            Ok(Err(e)) => {
                self.store.fail(task.id, &e.to_string()).await?;
                self.emit(
                    HeartbeatEventType::TaskFailed,
                    format!("failed \"{}\": {e}", task.title),
                    Some(task.title.clone()),
                    Some(task.task_type.to_string()),
                );
                Ok(RunTaskOutcome { completed: false, partial: None })
            }
            Err(_elapsed) => {
                self.store.fail(task.id, "task timed out").await?;
                self.emit(
                    HeartbeatEventType::TaskFailed,
                    format!("timed out: \"{}\"", task.title),
                    Some(task.title.clone()),
                    Some(task.task_type.to_string()),
                );
                Ok(RunTaskOutcome { completed: false, partial: None })
            }
        }
    }

    /// When the queue is empty, asks the background model to propose 3-5
    /// new tasks from recent completions. Unlike a task's own `NEW_TASKS:`
    /// follow-ups (which default to `Priority::Normal`), tasks proposed by
    /// reflection default to `Priority::Idle` absent an explicit priority —
    /// the assistant's own ideas shouldn't outrank work the user actually
    /// asked for.
    async fn reflect(&self) -> Result<()> {
        self.emit(HeartbeatEventType::Reflecting, "reflecting on recent work", None, None);

        let recent = self.store.get_recent_completed(6).await?;
        let summary = if recent.is_empty() {
            "(no completed tasks yet)".to_string()
        } else {
            recent
                .iter()
                .map(|t| format!("- {}: {}", t.title, t.result_summary.clone().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "The task queue is empty. Recent completed work:\n{summary}\n\n\
             Propose 3-5 new tasks for yourself to work on next. End with \
             FINAL: <short note> followed by \
             NEW_TASKS: [{{\"title\": \"...\", \"description\": \"...\", \"priority\": \"...\"}}, ...]"
        );

        let route = self.router.route("reflection", true);
        let request = TurnRequest {
            route,
            category: "reflection".to_string(),
            system_prompt: BACKGROUND_SYSTEM_PROMPT.to_string(),
            user_prompt: prompt,
            background: true,
        };
        let ctx = TurnContext::for_worker(CancellationToken::new());
        let outcome = self.executor.run(request, &ctx).await?;

        let proposed = parse_reflection_tasks(&outcome.output);
        let mut added = 0u32;
        for (title, description, priority) in proposed {
            self.store
                .add(
                    &title,
                    &description,
                    TaskType::Reflect,
                    priority,
                    None,
                    Vec::new(),
                    HashMap::new(),
                    None,
                    self.config.get_config().await.task_default_max_retries,
                )
                .await?;
            added += 1;
        }

        self.emit(HeartbeatEventType::TasksGenerated, format!("added {added}"), None, None);
        Ok(())
    }

    fn emit(
        &self,
        event_type: HeartbeatEventType,
        message: impl Into<String>,
        task_title: Option<String>,
        task_type: Option<String>,
    ) {
        let _ = self.events.send(HeartbeatEvent {
            event_type,
            message: message.into(),
            timestamp: Utc::now(),
            task_title,
            task_type,
        });
    }

    /// Exposed for the HTTP `skill_call` narration path: the executor's
    /// per-token/per-skill events are a separate broadcast channel (see
    /// `Executor::run`'s `TurnContext::with_events`); the heartbeat only
    /// ever narrates at the task level.
    #[cfg(test)]
    pub(crate) async fn run_task_for_test(&self, task: Task) -> Result<RunTaskOutcome> {
        self.run_task(task).await
    }

    #[cfg(test)]
    pub(crate) async fn tick_for_test(&self) -> Result<()> {
        self.tick().await
    }
}

/// Maps a task's type onto a Pre-Pipeline category string so the Router's
/// `EXPANSIVE` token-budget bump applies where it makes sense. Background
/// work bypasses `ALWAYS_LARGE`/`NEVER_LARGE` entirely (see `Router::route`),
/// so this only affects token budget, not model choice.
fn category_for(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Research => "research",
        TaskType::SelfImprove => "agentic_task",
        TaskType::Prepare => "planning",
        TaskType::Remind => "reminder",
        TaskType::Reflect => "reflection",
        TaskType::Maintain => "maintain",
        TaskType::Custom => "agentic_task",
    }
}

/// Parses a trailing `NEW_TASKS: [...]` JSON array out of a reflection
/// turn's final answer, defaulting an unspecified priority to `Idle`.
fn parse_reflection_tasks(text: &str) -> Vec<(String, String, Priority)> {
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
        .map(|t| {
            let priority = t.priority.and_then(|p| p.parse().ok()).unwrap_or(Priority::Idle);
            (t.title, t.description, priority)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmProvider, ModelSpec};
    use crate::router::RouterModels;
    use crate::skills::SkillRegistry;

    async fn test_config_manager() -> Arc<ConfigManager> {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGENT_HOME", dir.path());
        let manager = ConfigManager::new().await.unwrap();
        std::env::remove_var("AGENT_HOME");
        // Keep the tempdir alive for the manager's lifetime by leaking it —
        // tests only read/write the in-memory config, never the file again.
        std::mem::forget(dir);
        manager
    }

    fn unreachable_router() -> Arc<Router> {
        Arc::new(Router::new(
            RouterModels {
                small: "small".to_string(),
                medium: "medium".to_string(),
                large: "large".to_string(),
                fallback_preference: vec!["small".to_string()],
            },
            vec!["small".to_string()],
        ))
    }

    async fn heartbeat_with_unreachable_model() -> Arc<Heartbeat> {
        let store = Arc::new(TaskStore::open_in_memory().await.unwrap());
        let llm = Arc::new(LlmClient::new(vec![ModelSpec {
            id: "small".to_string(),
            provider: LlmProvider::OpenAiCompatible,
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: None,
        }]));
        let skills = Arc::new(SkillRegistry::new(
            std::env::temp_dir().join("hearth-heartbeat-test-skills"),
            Vec::new(),
        ));
        let config = test_config_manager().await;
        let executor = Arc::new(Executor::new(llm, skills, config.clone()));
        let router = unreachable_router();
        Heartbeat::new(store, executor, router, config)
    }

    #[tokio::test]
    async fn pause_for_user_returns_running_task_to_pending() {
        let heartbeat = heartbeat_with_unreachable_model().await;
        let id = heartbeat
            .store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        heartbeat.store.start(id).await.unwrap();

        heartbeat.pause_for_user();
        // pause_running() is spawned; give it a beat to land.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let task = heartbeat.store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, crate::store::TaskStatus::Pending);
        assert!(task.started_at.is_none());
    }

    #[tokio::test]
    async fn tick_is_a_no_op_while_paused() {
        let heartbeat = heartbeat_with_unreachable_model().await;
        let mut events = heartbeat.subscribe();
        heartbeat.pause_for_user();

        heartbeat.tick_for_test().await.unwrap();

        let event = events.try_recv().unwrap();
        // First event is the `paused` emitted by pause_for_user itself.
        assert_eq!(event.event_type, HeartbeatEventType::Paused);
        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type, HeartbeatEventType::Idle);
    }

    #[tokio::test]
    async fn resume_after_user_holds_paused_state_for_the_grace_window() {
        let heartbeat = heartbeat_with_unreachable_model().await;
        heartbeat.resume_after_user().await;
        assert!(heartbeat.is_paused());
    }

    #[test]
    fn parse_reflection_tasks_defaults_priority_to_idle() {
        let text = r#"FINAL: done
NEW_TASKS: [{"title": "A", "description": "d1"}, {"title": "B", "description": "d2", "priority": "high"}]"#;
        let tasks = parse_reflection_tasks(text);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].2, Priority::Idle);
        assert_eq!(tasks[1].2, Priority::High);
    }

    #[test]
    fn parse_reflection_tasks_absent_marker_is_empty() {
        assert!(parse_reflection_tasks("FINAL: nothing new").is_empty());
    }

    #[tokio::test]
    async fn reflection_runs_when_queue_is_empty() {
        let heartbeat = heartbeat_with_unreachable_model().await;
        // Drain the bootstrap seed so the queue is genuinely empty.
        while let Some(t) = heartbeat.store.next_pending().await.unwrap() {
            heartbeat.store.cancel(t.id, "clearing for test").await.unwrap();
        }

        let mut events = heartbeat.subscribe();
        // The model is unreachable, so reflect() will surface an error from
        // executor.run(); tick() propagates it rather than panicking.
        let result = heartbeat.tick_for_test().await;
        assert!(result.is_err());

        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type, HeartbeatEventType::Reflecting);
    }

    #[tokio::test]
    async fn run_task_on_user_cancellation_returns_a_paused_partial_without_failing_the_task() {
        let heartbeat = heartbeat_with_unreachable_model().await;
        let id = heartbeat
            .store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        let task = heartbeat.store.get(id).await.unwrap().unwrap();

        // run_task registers its CancellationToken in current_turn_cancel
        // only after store.start() lands, so the turn is started on a
        // background task and cancelled once it's actually in flight rather
        // than pre-empting a token that doesn't exist yet.
        let worker = heartbeat.clone();
        let handle = tokio::spawn(async move { worker.run_task_for_test(task).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        heartbeat.pause_for_user();

        let outcome = handle.await.unwrap().unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.partial.as_deref(), Some(HearthError::CancelledByUser.user_message().as_str()));

        let task = heartbeat.store.get(id).await.unwrap().unwrap();
        assert_ne!(task.status, crate::store::TaskStatus::Running);
    }
}
