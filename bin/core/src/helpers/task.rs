//! Task and TaskStage lifecycle operations. All state changes go through
//! [transition_task] so the legal transition DAG is enforced in one place.

use anyhow::Context;
use database::mungos::{
  by_id::{find_one_by_id, update_one_by_id},
  find::find_collect,
  mongodb::{
    bson::{doc, to_bson},
    options::FindOptions,
  },
  update::Update,
};
use pulp_manager_client::entities::{
  MongoId, pulp_manager_timestamp,
  server::PulpServerRepoTask,
  task::{Task, TaskStage, TaskState, TaskType},
};
use serde_json::Value;

use crate::{
  errors::PulpManagerError, helpers::WorkerIdentity, state::db_client,
};

/// Inserts a task and returns it with its assigned id.
pub async fn insert_task(mut task: Task) -> anyhow::Result<Task> {
  let result = db_client()
    .tasks
    .insert_one(&task)
    .await
    .context("failed to insert task")?;
  task.id = result
    .inserted_id
    .as_object_id()
    .context("task insert returned no object id")?
    .to_hex();
  Ok(task)
}

/// Creates a queued task. When a worker identity is given the task starts
/// out running, stamped with the worker details.
pub async fn create_task(
  name: impl Into<String>,
  task_type: TaskType,
  task_args: Value,
  worker: Option<&WorkerIdentity>,
) -> anyhow::Result<Task> {
  let now = pulp_manager_timestamp();
  let task = Task {
    id: String::new(),
    name: name.into(),
    parent_task_id: None,
    task_type,
    task_args,
    date_queued: now,
    date_started: worker.map(|_| now),
    date_finished: None,
    state: if worker.is_some() {
      TaskState::Running
    } else {
      TaskState::Queued
    },
    worker_name: worker.map(|worker| worker.name.clone()),
    worker_job_id: worker.and_then(|worker| worker.job_id.clone()),
    error: None,
    date_created: now,
    date_last_updated: now,
  };
  insert_task(task).await
}

pub async fn get_task(id: &str) -> anyhow::Result<Task> {
  find_one_by_id(&db_client().tasks, id)
    .await
    .context("failed to query tasks")?
    .ok_or_else(|| {
      PulpManagerError::TaskNotFound(format!(
        "task with id {id} not found"
      ))
      .into()
    })
}

/// Fetches an existing task and moves it to running under this worker.
pub async fn claim_task(
  id: &str,
  worker: &WorkerIdentity,
) -> anyhow::Result<Task> {
  let task = get_task(id).await?;
  let now = pulp_manager_timestamp();
  let mut update = doc! {
    "state": TaskState::Running.value(),
    "date_started": now,
    "date_last_updated": now,
    "worker_name": &worker.name,
  };
  if let Some(job_id) = &worker.job_id {
    update.insert("worker_job_id", job_id);
  }
  update_one_by_id(&db_client().tasks, id, Update::Set(update), None)
    .await
    .context("failed to claim task")?;
  get_task(&task.id).await
}

/// Validates and applies a task state transition, stamping
/// `date_started` / `date_finished` as states are entered. Illegal
/// transitions are rejected and nothing is persisted.
pub async fn transition_task(
  task: &Task,
  new_state: TaskState,
) -> anyhow::Result<Task> {
  transition_task_with(task, new_state, None).await
}

/// Like [transition_task], but also records an error document, for moves
/// into failed states.
pub async fn transition_task_with(
  task: &Task,
  new_state: TaskState,
  error: Option<Value>,
) -> anyhow::Result<Task> {
  if !task.state.can_transition_to(new_state) {
    return Err(
      PulpManagerError::InvalidTaskState(format!(
        "task {} cannot move from {} to {new_state}",
        task.id, task.state
      ))
      .into(),
    );
  }
  let now = pulp_manager_timestamp();
  let mut update = doc! {
    "state": new_state.value(),
    "date_last_updated": now,
  };
  if new_state == TaskState::Running && task.date_started.is_none() {
    update.insert("date_started", now);
  }
  if new_state.is_terminal() {
    update.insert("date_finished", now);
  }
  if let Some(error) = error {
    update.insert(
      "error",
      to_bson(&error).context("failed to serialize task error")?,
    );
  }
  update_one_by_id(&db_client().tasks, &task.id, Update::Set(update), None)
    .await
    .context("failed to update task state")?;
  get_task(&task.id).await
}

pub async fn complete_task(task: &Task) -> anyhow::Result<Task> {
  transition_task(task, TaskState::Completed).await
}

/// Marks a task failed with a `{msg, detail}` error document.
pub async fn log_task_error(
  task: &Task,
  msg: &str,
  detail: &str,
) -> anyhow::Result<Task> {
  transition_task_with(
    task,
    TaskState::Failed,
    Some(serde_json::json!({ "msg": msg, "detail": detail })),
  )
  .await
}

/// Touches a task so the reaper sees it is alive.
pub async fn touch_task(task_id: &str) -> anyhow::Result<()> {
  update_one_by_id(
    &db_client().tasks,
    task_id,
    Update::Set(doc! { "date_last_updated": pulp_manager_timestamp() }),
    None,
  )
  .await
  .context("failed to touch task")?;
  Ok(())
}

pub async fn add_stage(
  task_id: &str,
  name: impl Into<String>,
  detail: Option<Value>,
) -> anyhow::Result<TaskStage> {
  let now = pulp_manager_timestamp();
  let mut stage = TaskStage {
    id: String::new(),
    task_id: task_id.to_string(),
    name: name.into(),
    detail,
    error: None,
    date_created: now,
    date_last_updated: now,
  };
  let result = db_client()
    .task_stages
    .insert_one(&stage)
    .await
    .context("failed to insert task stage")?;
  stage.id = result
    .inserted_id
    .as_object_id()
    .context("task stage insert returned no object id")?
    .to_hex();
  Ok(stage)
}

pub async fn update_stage_detail(
  stage: &TaskStage,
  detail: Value,
) -> anyhow::Result<()> {
  update_stage(stage, Some(detail), None).await
}

pub async fn update_stage_error(
  stage: &TaskStage,
  error: Value,
) -> anyhow::Result<()> {
  update_stage(stage, None, Some(error)).await
}

async fn update_stage(
  stage: &TaskStage,
  detail: Option<Value>,
  error: Option<Value>,
) -> anyhow::Result<()> {
  let mut update = doc! {
    "date_last_updated": pulp_manager_timestamp(),
  };
  if let Some(detail) = detail {
    update.insert(
      "detail",
      to_bson(&detail).context("failed to serialize stage detail")?,
    );
  }
  if let Some(error) = error {
    update.insert(
      "error",
      to_bson(&error).context("failed to serialize stage error")?,
    );
  }
  update_one_by_id(&db_client().task_stages, &stage.id, Update::Set(update), None)
    .await
    .context("failed to update task stage")?;
  Ok(())
}

/// Stages of a task in creation order.
pub async fn task_stages(task_id: &str) -> anyhow::Result<Vec<TaskStage>> {
  find_collect(
    &db_client().task_stages,
    doc! { "task_id": task_id },
    FindOptions::builder().sort(doc! { "date_created": 1 }).build(),
  )
  .await
  .context("failed to query task stages")
}

pub async fn latest_stage(
  task_id: &str,
) -> anyhow::Result<Option<TaskStage>> {
  Ok(task_stages(task_id).await?.pop())
}

/// Links a repo to a task for health tracking.
pub async fn link_repo_task(
  pulp_server_repo_id: &MongoId,
  task_id: &MongoId,
) -> anyhow::Result<()> {
  let link = PulpServerRepoTask {
    id: String::new(),
    pulp_server_repo_id: pulp_server_repo_id.clone(),
    task_id: task_id.clone(),
    date_created: pulp_manager_timestamp(),
  };
  db_client()
    .pulp_server_repo_tasks
    .insert_one(&link)
    .await
    .context("failed to link repo to task")?;
  Ok(())
}

/// The last `limit` task states linked to a repo, newest first.
pub async fn linked_task_states(
  pulp_server_repo_id: &MongoId,
  limit: i64,
) -> anyhow::Result<Vec<TaskState>> {
  let links = find_collect(
    &db_client().pulp_server_repo_tasks,
    doc! { "pulp_server_repo_id": pulp_server_repo_id },
    FindOptions::builder()
      .sort(doc! { "date_created": -1 })
      .limit(limit)
      .build(),
  )
  .await
  .context("failed to query repo task links")?;

  let mut states = Vec::with_capacity(links.len());
  for link in links {
    if let Some(task) =
      find_one_by_id(&db_client().tasks, &link.task_id)
        .await
        .context("failed to query linked task")?
    {
      states.push(task.state);
    }
  }
  Ok(states)
}
