//! A small bounded deque of human-readable notices derived from heartbeat
//! events — backs `GET /proactive`, `GET /proactive/push`, and the
//! `proactive` SSE event type on `POST /chat`.

use std::collections::VecDeque;
use std::sync::Arc;

use hearth_core::heartbeat::{HeartbeatEvent, HeartbeatEventType};
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ProactiveQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl ProactiveQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))), capacity }
    }

    /// Spawns a task that folds heartbeat events worth surfacing to the
    /// user into the queue. Dropped (not fatal) once the heartbeat's
    /// broadcast sender goes away.
    pub fn watch(&self, mut events: broadcast::Receiver<HeartbeatEvent>) {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => queue.push(notice_for(&event)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn push(&self, notice: Option<String>) {
        let Some(notice) = notice else { return };
        let mut guard = self.inner.lock().expect("proactive queue mutex poisoned");
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(notice);
    }

    /// Returns the pending notices without clearing them.
    pub fn peek(&self) -> Vec<String> {
        self.inner.lock().expect("proactive queue mutex poisoned").iter().cloned().collect()
    }

    /// Drains and returns every pending notice.
    pub fn drain(&self) -> Vec<String> {
        self.inner.lock().expect("proactive queue mutex poisoned").drain(..).collect()
    }
}

fn notice_for(event: &HeartbeatEvent) -> Option<String> {
    match event.event_type {
        HeartbeatEventType::TaskDone => {
            Some(format!("Finished: {}", event.task_title.as_deref().unwrap_or("a background task")))
        }
        HeartbeatEventType::TaskFailed => {
            Some(format!("Couldn't finish: {}", event.task_title.as_deref().unwrap_or("a background task")))
        }
        HeartbeatEventType::TasksGenerated => Some(event.message.clone()),
        _ => None,
    }
}
