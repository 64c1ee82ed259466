use anyhow::Context;
use axum::{
  Json, Router,
  extract::{Path, Query},
  middleware,
  routing::get,
};
use database::{
  filter::{build_filter, sort_options},
  mungos::{
    by_id::find_one_by_id,
    mongodb::bson::Bson,
  },
  paged::filter_paged_result,
};
use job_queue::QueueError;
use pulp_manager_client::{
  api::{
    Page,
    task::{
      TaskDetailResponse, TaskResponse, TaskStatePatch,
      TaskStageResponse,
    },
  },
  entities::task::{TaskState, TaskType},
};
use reqwest::StatusCode;
use serde::Deserialize;
use serror::{AddStatusCode as _, AddStatusCodeError as _};
use strum::IntoEnumIterator;

use super::parse_name_or_value;
use crate::{
  auth::admin_request,
  config::core_config,
  helpers::task::{task_stages, transition_task},
  state::{db_client, queue_client},
};

pub fn router() -> Router {
  Router::new()
    .route("/", get(get_all))
    .route("/task_types", get(get_task_types))
    .route("/task_states", get(get_task_states))
    .route("/{id}", get(get_one))
    .merge(
      Router::new()
        .route("/{id}", axum::routing::patch(change_state))
        .layer(middleware::from_fn(admin_request)),
    )
}

#[derive(Debug, Deserialize)]
struct TasksQuery {
  name: Option<String>,
  name__match: Option<String>,
  parent_task_id: Option<String>,
  /// State name or id.
  state: Option<String>,
  /// Task type name or id.
  task_type: Option<String>,
  worker_name: Option<String>,
  worker_job_id: Option<String>,
  date_queued__le: Option<i64>,
  date_queued__ge: Option<i64>,
  date_started__le: Option<i64>,
  date_started__ge: Option<i64>,
  date_finished__le: Option<i64>,
  date_finished__ge: Option<i64>,
  #[serde(flatten)]
  paging: super::Paging,
}

async fn get_all(
  Query(query): Query<TasksQuery>,
) -> serror::Result<Json<Page<TaskResponse>>> {
  let mut params: Vec<(String, Bson)> = Vec::new();
  let mut push = |key: &str, value: Option<Bson>| {
    if let Some(value) = value {
      params.push((key.to_string(), value));
    }
  };
  let state = query
    .state
    .as_deref()
    .map(|state| {
      parse_name_or_value(state, TaskState::from_value)
        .map(|state| Bson::Int32(state.value()))
        .with_context(|| format!("invalid state '{state}'"))
    })
    .transpose()
    .status_code(StatusCode::BAD_REQUEST)?;
  let task_type = query
    .task_type
    .as_deref()
    .map(|task_type| {
      parse_name_or_value(task_type, TaskType::from_value)
        .map(|task_type| Bson::Int32(task_type.value()))
        .with_context(|| format!("invalid task_type '{task_type}'"))
    })
    .transpose()
    .status_code(StatusCode::BAD_REQUEST)?;

  push("name", query.name.map(Bson::from));
  push("name__match", query.name__match.map(Bson::from));
  push("parent_task_id", query.parent_task_id.map(Bson::from));
  push("state", state);
  push("task_type", task_type);
  push("worker_name", query.worker_name.map(Bson::from));
  push("worker_job_id", query.worker_job_id.map(Bson::from));
  push("date_queued__le", query.date_queued__le.map(Bson::from));
  push("date_queued__ge", query.date_queued__ge.map(Bson::from));
  push("date_started__le", query.date_started__le.map(Bson::from));
  push("date_started__ge", query.date_started__ge.map(Bson::from));
  push(
    "date_finished__le",
    query.date_finished__le.map(Bson::from),
  );
  push(
    "date_finished__ge",
    query.date_finished__ge.map(Bson::from),
  );

  let filter = build_filter(&params, &[])
    .map_err(anyhow::Error::new)
    .status_code(StatusCode::BAD_REQUEST)?;
  let sort = sort_options(
    query.paging.sort_by.as_deref(),
    query.paging.order_by.as_deref(),
    &[],
  )
  .map_err(anyhow::Error::new)
  .status_code(StatusCode::BAD_REQUEST)?;

  let page = filter_paged_result(
    &db_client().tasks,
    filter,
    sort,
    query.paging.page(),
    query.paging.page_size(),
    core_config().paging.max_page_size,
  )
  .await
  .status_code(StatusCode::BAD_REQUEST)?;

  Ok(Json(page.map(TaskResponse::from)))
}

async fn get_task_types() -> Json<Vec<String>> {
  Json(
    TaskType::iter()
      .map(|task_type| task_type.to_string())
      .collect(),
  )
}

async fn get_task_states() -> Json<Vec<String>> {
  Json(TaskState::iter().map(|state| state.to_string()).collect())
}

async fn get_one(
  Path(id): Path<String>,
) -> serror::Result<Json<TaskDetailResponse>> {
  let task = find_one_by_id(&db_client().tasks, &id)
    .await
    .ok()
    .flatten()
    .context("Task not found")
    .status_code(StatusCode::NOT_FOUND)?;
  let stages = task_stages(&task.id).await?;
  Ok(Json(TaskDetailResponse {
    task: task.into(),
    stages: stages.into_iter().map(TaskStageResponse::from).collect(),
  }))
}

/// Changes the state of a task; the only transition the control plane
/// drives is → canceled, which also cancels the backing job.
async fn change_state(
  Path(id): Path<String>,
  serror::Json(body): serror::Json<TaskStatePatch>,
) -> serror::Result<Json<TaskResponse>> {
  if body.state != TaskState::Canceled {
    return Err(
      anyhow::anyhow!(
        "only transitions to canceled are supported, got {}",
        body.state
      )
      .status_code(StatusCode::BAD_REQUEST)
      .into(),
    );
  }

  let task = find_one_by_id(&db_client().tasks, &id)
    .await
    .ok()
    .flatten()
    .context("Task not found")
    .status_code(StatusCode::NOT_FOUND)?;

  let task = transition_task(&task, TaskState::Canceled)
    .await
    .status_code(StatusCode::BAD_REQUEST)?;

  if let Some(job_id) = &task.worker_job_id {
    match queue_client().cancel_job(job_id).await {
      Ok(_) => {}
      Err(QueueError::JobNotFound(_)) => {}
      Err(e) => {
        warn!("failed to cancel job {job_id} for task {id} | {e:#}")
      }
    }
  }

  Ok(Json(task.into()))
}
