use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::{
  I64, MongoId,
  task::{Task, TaskStage, TaskState},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
  pub id: MongoId,
  pub name: String,
  pub parent_task_id: Option<MongoId>,
  /// Task type name, e.g. `repo_group_sync`.
  pub task_type: String,
  pub task_args: Value,
  pub date_queued: I64,
  pub date_started: Option<I64>,
  pub date_finished: Option<I64>,
  /// State name, e.g. `running`.
  pub state: String,
  pub error: Option<Value>,
  pub worker_name: Option<String>,
  pub worker_job_id: Option<String>,
}

impl From<Task> for TaskResponse {
  fn from(task: Task) -> Self {
    TaskResponse {
      id: task.id,
      name: task.name,
      parent_task_id: task.parent_task_id,
      task_type: task.task_type.to_string(),
      task_args: task.task_args,
      date_queued: task.date_queued,
      date_started: task.date_started,
      date_finished: task.date_finished,
      state: task.state.to_string(),
      error: task.error,
      worker_name: task.worker_name,
      worker_job_id: task.worker_job_id,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStageResponse {
  pub id: MongoId,
  pub task_id: MongoId,
  pub name: String,
  pub detail: Option<Value>,
  pub error: Option<Value>,
}

impl From<TaskStage> for TaskStageResponse {
  fn from(stage: TaskStage) -> Self {
    TaskStageResponse {
      id: stage.id,
      task_id: stage.task_id,
      name: stage.name,
      detail: stage.detail,
      error: stage.error,
    }
  }
}

/// Task plus its ordered stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetailResponse {
  #[serde(flatten)]
  pub task: TaskResponse,
  pub stages: Vec<TaskStageResponse>,
}

/// Body for the task state PATCH. Accepts the state name or id; the only
/// transition the control plane performs today is → canceled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatePatch {
  pub state: TaskState,
}
