//! `POST /chat`: classify, route, run a turn, and narrate the whole thing
//! as an SSE stream — `stage`/`stage_done` bracketing each phase,
//! `quick_ack` the moment the message is accepted, `thinking`/`token`/
//! `skill_call` forwarded live from the Executor, any pending `proactive`
//! notices drained in before the end, and one closing `final` event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use hearth_core::executor::{ExecutorEvent, TurnContext, TurnRequest};
use hearth_core::store::Interaction;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::context::Core;
use crate::server::AppError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct FinalBody {
    output: String,
    success: bool,
    model_used: String,
    tool_calls: u32,
}

pub async fn chat_handler(
    State(core): State<Arc<Core>>,
    Json(body): Json<ChatRequest>,
) -> axum::response::Response {
    if body.message.trim().is_empty() {
        return AppError::bad_request("empty").into_response();
    }

    let stream = chat_stream(core, body.message);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn chat_stream(
    core: Arc<Core>,
    message: String,
) -> impl futures_util::Stream<Item = Result<Event, Infallible>> {
    stream! {
        yield Ok(sse("quick_ack", &serde_json::json!({ "received": true })));

        // A user turn pre-empts the heartbeat for the duration of the
        // turn: `pause_for_user` happens-before any new model invocation
        // the heartbeat would otherwise start (see the crate's
        // concurrency notes), and is undone by `resume_after_user` once
        // this turn's memory write and follow-up enqueue are done.
        core.heartbeat.pause_for_user();

        yield Ok(sse("stage", &serde_json::json!({ "stage": "classifying" })));
        let intent = core.pipeline.process(&message).await;
        yield Ok(sse("stage_done", &serde_json::json!({ "stage": "classifying", "category": intent.category })));

        yield Ok(sse("stage", &serde_json::json!({ "stage": "routing" })));
        let route = core.router.route(&intent.category, false);
        yield Ok(sse("stage_done", &serde_json::json!({ "stage": "routing", "model": route.model_id })));

        yield Ok(sse("stage", &serde_json::json!({ "stage": "executing" })));

        let (events_tx, mut events_rx) = broadcast::channel::<ExecutorEvent>(64);
        let ctx = TurnContext::with_events(CancellationToken::new(), events_tx);
        let request = TurnRequest {
            route,
            category: intent.category.clone(),
            system_prompt: system_prompt(&core),
            user_prompt: intent.rewritten.clone(),
            background: false,
        };

        let executor = core.executor.clone();
        let started = Instant::now();
        let mut run_fut = Box::pin(async move { executor.run(request, &ctx).await });

        let outcome = loop {
            tokio::select! {
                biased;
                event = events_rx.recv() => {
                    match event {
                        Ok(ExecutorEvent::Thinking(text)) => {
                            yield Ok(sse("thinking", &serde_json::json!({ "text": text })));
                        }
                        Ok(ExecutorEvent::Token(text)) => {
                            yield Ok(sse("token", &serde_json::json!({ "text": text })));
                        }
                        Ok(ExecutorEvent::SkillCall { name }) => {
                            yield Ok(sse("skill_call", &serde_json::json!({ "name": name })));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }
                result = &mut run_fut => {
                    break result;
                }
            }
        };

        yield Ok(sse("stage_done", &serde_json::json!({ "stage": "executing" })));

        for notice in core.proactive.drain() {
            yield Ok(sse("proactive", &serde_json::json!({ "message": notice })));
        }

        let final_body = match outcome {
            Ok(turn) => {
                let interaction = Interaction {
                    id: 0,
                    timestamp: Utc::now(),
                    user_input: message.clone(),
                    intent_json: serde_json::to_value(&intent).unwrap_or_default(),
                    model_used: turn.model_used.clone(),
                    output: turn.output.clone(),
                    success: turn.success,
                    tool_calls: turn.tool_calls,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                if let Err(e) = core.store.record_interaction(&interaction).await {
                    tracing::warn!(error = %e, "failed to record interaction");
                }

                // Memory write: facts the Pre-Pipeline extracted go into the
                // durable user-facts table; the turn itself is logged to
                // semantic memory so later `search` calls can recall it.
                for fact in &intent.facts {
                    if let Err(e) = core.store.log_user_fact(fact, intent.confidence, "chat").await {
                        tracing::warn!(error = %e, "failed to record extracted fact");
                    }
                }
                if let Err(e) = core.memory.log(&format!("user: {message}\nassistant: {}", turn.output)).await {
                    tracing::warn!(error = %e, "failed to log interaction to semantic memory");
                }

                // Follow-up task enqueue: anything the model proposed via a
                // trailing `NEW_TASKS:` block on its own answer.
                for new_task in &turn.new_tasks {
                    if let Err(e) = core
                        .store
                        .add(
                            &new_task.title,
                            &new_task.description,
                            hearth_core::store::TaskType::Custom,
                            new_task.priority,
                            None,
                            Vec::new(),
                            std::collections::HashMap::new(),
                            None,
                            core.config.get_config().await.task_default_max_retries,
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "failed to enqueue follow-up task");
                    }
                }

                FinalBody {
                    output: turn.output,
                    success: turn.success,
                    model_used: turn.model_used,
                    tool_calls: turn.tool_calls,
                }
            }
            Err(e) => FinalBody {
                output: e.user_message(),
                success: false,
                model_used: String::new(),
                tool_calls: 0,
            },
        };

        // Heartbeat resume: the background worker may proceed again now
        // that this turn's memory write and follow-up enqueue are done.
        core.heartbeat.resume_after_user().await;

        yield Ok(sse("final", &final_body));
    }
}

fn sse(event: &str, body: &impl Serialize) -> Event {
    Event::default().event(event).data(serde_json::to_string(body).unwrap_or_default())
}

fn system_prompt(core: &Core) -> String {
    format!(
        "You are {}, a locally-hosted personal assistant. Respond using SKILL:, FINAL:, or \
         ESCALATE: as instructed by your tool-use contract. If the user's request implies work \
         you should continue later (a reminder, a follow-up investigation), end your FINAL answer \
         with NEW_TASKS: [{{\"title\": ..., \"description\": ..., \"priority\": ...}}]; omit it otherwise.",
        core.assistant_name
    )
}
