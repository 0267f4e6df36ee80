//! `/tasks` CRUD — a thin HTTP face over the Task Store, shared by the
//! `/tasks` endpoints and (indirectly) `hearth tasks` on the CLI side.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use hearth_core::store::{Priority, Task, TaskStatus, TaskSummary, TaskType};
use serde::Deserialize;

use crate::context::Core;
use crate::server::AppError;

const DEFAULT_LIST_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

pub async fn list_tasks(
    State(core): State<Arc<Core>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(|e: String| AppError::bad_request(format!("invalid status: {e}")))?;
    let tasks = core.store.get_all(status, query.limit.unwrap_or(DEFAULT_LIST_LIMIT)).await?;
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    title: String,
    description: String,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    priority_name: Option<String>,
}

#[derive(serde::Serialize)]
pub struct CreateTaskResponse {
    id: i64,
}

pub async fn create_task(
    State(core): State<Arc<Core>>,
    Json(body): Json<CreateTaskBody>,
) -> Result<Json<CreateTaskResponse>, AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::bad_request("title cannot be empty"));
    }
    let task_type = body
        .task_type
        .as_deref()
        .map(|s| s.parse::<TaskType>())
        .transpose()
        .map_err(|e: String| AppError::bad_request(format!("invalid task_type: {e}")))?
        .unwrap_or(TaskType::Custom);
    let priority = body
        .priority_name
        .as_deref()
        .map(|s| s.parse::<Priority>())
        .transpose()
        .map_err(|e: String| AppError::bad_request(format!("invalid priority_name: {e}")))?
        .unwrap_or(Priority::Normal);

    let cfg = core.config.get_config().await;
    let id = core
        .store
        .add(
            &body.title,
            &body.description,
            task_type,
            priority,
            None,
            Vec::new(),
            HashMap::new(),
            None,
            cfg.task_default_max_retries,
        )
        .await?;
    Ok(Json(CreateTaskResponse { id }))
}

pub async fn cancel_task(
    State(core): State<Arc<Core>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    core.store.cancel(id, "cancelled via API").await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "cancelled" })))
}

pub async fn summary(State(core): State<Arc<Core>>) -> Result<Json<TaskSummary>, AppError> {
    Ok(Json(core.store.summary().await?))
}
