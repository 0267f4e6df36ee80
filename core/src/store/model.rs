//! Data model for the Task Store: `Task`, `TaskLogEntry`, `Interaction`, and
//! the closed enums that give them their invariants.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority ascending = more urgent; `Ord` is derived from the numeric
/// discriminant so `ORDER BY priority ASC` and `Task: Ord` agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Idle = 4,
}

impl Priority {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            3 => Priority::Low,
            _ => Priority::Idle,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "idle" => Ok(Priority::Idle),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Idle => "idle",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Research,
    SelfImprove,
    Prepare,
    Remind,
    Reflect,
    Maintain,
    Custom,
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "research" => Ok(TaskType::Research),
            "self_improve" => Ok(TaskType::SelfImprove),
            "prepare" => Ok(TaskType::Prepare),
            "remind" => Ok(TaskType::Remind),
            "reflect" => Ok(TaskType::Reflect),
            "maintain" => Ok(TaskType::Maintain),
            "custom" => Ok(TaskType::Custom),
            other => Err(format!("unknown task_type: {other}")),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::Research => "research",
            TaskType::SelfImprove => "self_improve",
            TaskType::Prepare => "prepare",
            TaskType::Remind => "remind",
            TaskType::Reflect => "reflect",
            TaskType::Maintain => "maintain",
            TaskType::Custom => "custom",
        };
        write!(f, "{name}")
    }
}

/// Non-terminal: `Pending`, `Running`. Terminal: `Done`, `Failed`,
/// `Cancelled`. Transitions are one-way except `Pending -> Running ->
/// Pending` (retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// The queue's central entity. Never destroyed — history is retained even
/// through terminal states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Truncated to 1000 chars by the store on write.
    pub result_summary: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub parent_id: Option<i64>,
    pub tags: Vec<String>,
    pub context: HashMap<String, serde_json::Value>,
    /// Bumped on every mutation; not part of the distilled spec's record but
    /// needed so bulk updates like `pause_running()` are observable without
    /// re-deriving them from `task_log`.
    pub updated_at: DateTime<Utc>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    /// Matches `next_pending()`'s selection order: priority ascending, then
    /// oldest `created_at` first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskLogEvent {
    Created,
    Started,
    Completed,
    Failed,
    RetryScheduled,
    Cancelled,
    Rescheduled,
}

impl std::fmt::Display for TaskLogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskLogEvent::Created => "created",
            TaskLogEvent::Started => "started",
            TaskLogEvent::Completed => "completed",
            TaskLogEvent::Failed => "failed",
            TaskLogEvent::RetryScheduled => "retry_scheduled",
            TaskLogEvent::Cancelled => "cancelled",
            TaskLogEvent::Rescheduled => "rescheduled",
        };
        write!(f, "{name}")
    }
}

impl FromStr for TaskLogEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskLogEvent::Created),
            "started" => Ok(TaskLogEvent::Started),
            "completed" => Ok(TaskLogEvent::Completed),
            "failed" => Ok(TaskLogEvent::Failed),
            "retry_scheduled" => Ok(TaskLogEvent::RetryScheduled),
            "cancelled" => Ok(TaskLogEvent::Cancelled),
            "rescheduled" => Ok(TaskLogEvent::Rescheduled),
            other => Err(format!("unknown task_log event: {other}")),
        }
    }
}

/// Append-only audit row. Every state change produces exactly one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: i64,
    pub timestamp: DateTime<Utc>,
    pub event: TaskLogEvent,
    pub detail: String,
}

/// One user turn, written exactly once by the Executor on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub intent_json: serde_json::Value,
    pub model_used: String,
    pub output: String,
    pub success: bool,
    pub tool_calls: u32,
    pub duration_ms: u64,
}

/// Aggregate counts used by `GET /tasks/summary` and the reflection skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// One observation about the user, logged by the Executor or a skill.
/// Backs `GET /profile`; confidence is the logging model's own estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFact {
    pub id: i64,
    pub fact: String,
    pub confidence: f32,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn priority_round_trips_through_display_and_from_str() {
        for p in [Priority::Critical, Priority::High, Priority::Normal, Priority::Low, Priority::Idle] {
            assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
        }
    }

    #[test]
    fn priority_orders_critical_as_most_urgent() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Idle > Priority::Low);
    }

    #[test]
    fn priority_from_str_is_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
    }

    #[test]
    fn priority_from_str_rejects_unknown_values() {
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn task_type_round_trips_through_display_and_from_str() {
        for t in [
            TaskType::Research,
            TaskType::SelfImprove,
            TaskType::Prepare,
            TaskType::Remind,
            TaskType::Reflect,
            TaskType::Maintain,
            TaskType::Custom,
        ] {
            assert_eq!(t.to_string().parse::<TaskType>().unwrap(), t);
        }
    }

    #[test]
    fn task_status_round_trips_and_reports_terminal_states() {
        for s in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Done, TaskStatus::Failed, TaskStatus::Cancelled]
        {
            assert_eq!(s.to_string().parse::<TaskStatus>().unwrap(), s);
        }
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn task_log_event_round_trips_through_display_and_from_str() {
        for e in [
            TaskLogEvent::Created,
            TaskLogEvent::Started,
            TaskLogEvent::Completed,
            TaskLogEvent::Failed,
            TaskLogEvent::RetryScheduled,
            TaskLogEvent::Cancelled,
            TaskLogEvent::Rescheduled,
        ] {
            assert_eq!(e.to_string().parse::<TaskLogEvent>().unwrap(), e);
        }
    }

    #[test]
    fn task_ord_sorts_by_priority_then_created_at() {
        let base = Utc::now();
        let mut urgent = sample_task(1, Priority::Critical, base);
        let mut older_normal = sample_task(2, Priority::Normal, base - ChronoDuration::minutes(5));
        let mut newer_normal = sample_task(3, Priority::Normal, base);
        let mut tasks = vec![newer_normal.clone(), urgent.clone(), older_normal.clone()];
        tasks.sort();
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        // Touching fields other than id/priority/created_at doesn't change equality or order.
        urgent.result_summary = Some("done".to_string());
        older_normal.retry_count = 2;
        newer_normal.tags = vec!["x".to_string()];
        assert_eq!(urgent, sample_task(1, Priority::Low, base));
    }

    fn sample_task(id: i64, priority: Priority, created_at: DateTime<Utc>) -> Task {
        Task {
            id,
            title: "t".to_string(),
            description: String::new(),
            task_type: TaskType::Custom,
            priority,
            status: TaskStatus::Pending,
            created_at,
            scheduled_at: created_at,
            started_at: None,
            completed_at: None,
            result_summary: None,
            retry_count: 0,
            max_retries: 2,
            parent_id: None,
            tags: Vec::new(),
            context: HashMap::new(),
            updated_at: created_at,
        }
    }
}
