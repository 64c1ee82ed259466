use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{I64, MongoId, int_enum_serde};

/// The workflow kinds Pulp Manager runs. Stored as its small-int id.
///
/// A `repo_group_sync` task is the parent of the per-repo `repo_sync`
/// children created for it; `repo_snapshot` parents its per-repo copies the
/// same way.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Display,
  EnumString,
  EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
  RepoSync,
  RepoGroupSync,
  RepoSnapshot,
  RepoCreationFromGit,
  RepoRemoval,
  RemoveRepoContent,
}

impl TaskType {
  pub fn value(&self) -> i32 {
    match self {
      TaskType::RepoSync => 1,
      TaskType::RepoGroupSync => 2,
      TaskType::RepoSnapshot => 3,
      TaskType::RepoCreationFromGit => 4,
      TaskType::RepoRemoval => 5,
      TaskType::RemoveRepoContent => 6,
    }
  }

  pub fn from_value(value: i32) -> Option<TaskType> {
    match value {
      1 => Some(TaskType::RepoSync),
      2 => Some(TaskType::RepoGroupSync),
      3 => Some(TaskType::RepoSnapshot),
      4 => Some(TaskType::RepoCreationFromGit),
      5 => Some(TaskType::RepoRemoval),
      6 => Some(TaskType::RemoveRepoContent),
      _ => None,
    }
  }
}

int_enum_serde!(TaskType);

/// Task lifecycle states. Stored as its small-int id.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Display,
  EnumString,
  EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
  Queued,
  Running,
  Completed,
  Failed,
  Canceled,
  FailedToStart,
  Skipped,
}

impl TaskState {
  pub fn value(&self) -> i32 {
    match self {
      TaskState::Queued => 1,
      TaskState::Running => 2,
      TaskState::Completed => 3,
      TaskState::Failed => 4,
      TaskState::Canceled => 5,
      TaskState::FailedToStart => 6,
      TaskState::Skipped => 7,
    }
  }

  pub fn from_value(value: i32) -> Option<TaskState> {
    match value {
      1 => Some(TaskState::Queued),
      2 => Some(TaskState::Running),
      3 => Some(TaskState::Completed),
      4 => Some(TaskState::Failed),
      5 => Some(TaskState::Canceled),
      6 => Some(TaskState::FailedToStart),
      7 => Some(TaskState::Skipped),
      _ => None,
    }
  }

  /// Terminal states are absorbing.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskState::Completed
        | TaskState::Failed
        | TaskState::Canceled
        | TaskState::FailedToStart
        | TaskState::Skipped
    )
  }

  /// Legal transitions:
  /// queued → running | canceled | failed_to_start | skipped,
  /// running → completed | failed | canceled.
  pub fn can_transition_to(&self, next: TaskState) -> bool {
    match self {
      TaskState::Queued => matches!(
        next,
        TaskState::Running
          | TaskState::Canceled
          | TaskState::FailedToStart
          | TaskState::Skipped
      ),
      TaskState::Running => matches!(
        next,
        TaskState::Completed | TaskState::Failed | TaskState::Canceled
      ),
      _ => false,
    }
  }
}

int_enum_serde!(TaskState);

/// Durable record of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_task_id: Option<MongoId>,
  pub task_type: TaskType,
  #[serde(default)]
  pub task_args: serde_json::Value,
  pub date_queued: I64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date_started: Option<I64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date_finished: Option<I64>,
  pub state: TaskState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub worker_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub worker_job_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<serde_json::Value>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

/// One step of a running task. Append-only within a task; `detail` carries
/// the human readable message and, when a backend task is in flight, its
/// `task_href`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStage {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub task_id: MongoId,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<serde_json::Value>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn removal_task_types_are_distinguishable() {
    assert_ne!(
      TaskType::RepoRemoval.value(),
      TaskType::RemoveRepoContent.value()
    );
    for task_type in TaskType::iter() {
      assert_eq!(
        TaskType::from_value(task_type.value()),
        Some(task_type)
      );
    }
  }

  #[test]
  fn task_state_transitions_follow_the_dag() {
    use TaskState::*;
    let all = TaskState::iter().collect::<Vec<_>>();

    for next in &all {
      assert_eq!(
        Queued.can_transition_to(*next),
        matches!(next, Running | Canceled | FailedToStart | Skipped),
        "queued -> {next}"
      );
      assert_eq!(
        Running.can_transition_to(*next),
        matches!(next, Completed | Failed | Canceled),
        "running -> {next}"
      );
    }

    for state in all.iter().filter(|s| s.is_terminal()) {
      for next in &all {
        assert!(!state.can_transition_to(*next), "{state} -> {next}");
      }
    }
  }

  #[test]
  fn task_state_serde_accepts_name_or_id() {
    assert_eq!(
      serde_json::to_string(&TaskState::FailedToStart).unwrap(),
      "6"
    );
    let by_id: TaskState = serde_json::from_str("6").unwrap();
    let by_name: TaskState =
      serde_json::from_str("\"failed_to_start\"").unwrap();
    assert_eq!(by_id, TaskState::FailedToStart);
    assert_eq!(by_name, TaskState::FailedToStart);
  }
}
