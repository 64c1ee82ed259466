//! The workflow controllers. Each drives a backend through asynchronous
//! API tasks from inside a worker job, recording progress as TaskStages.

use pulp_manager_client::entities::task::TaskState;
use serde_json::{Value, json};

use crate::helpers::task::{get_task, log_task_error};

pub mod content;
pub mod removal;
pub mod repo_sync;
pub mod snapshot;

pub const SYNC_STAGE_NAME: &str = "sync repo";
pub const REMOVE_BANNED_PACKAGES_STAGE_NAME: &str =
  "remove banned packages";
pub const PUBLISH_STAGE_NAME: &str = "publish repo";
pub const SNAPSHOT_STAGE_NAME: &str = "repo snapshot";
pub const SNAPSHOT_PUBLISH_STAGE_NAME: &str = "repo publication";

pub fn stage_detail(msg: impl Into<String>) -> Value {
  json!({ "msg": msg.into() })
}

pub fn stage_detail_with_task(
  msg: impl Into<String>,
  task_href: &str,
) -> Value {
  json!({ "msg": msg.into(), "task_href": task_href })
}

pub fn stage_error(msg: impl Into<String>, detail: &str) -> Value {
  json!({ "msg": msg.into(), "detail": detail })
}

/// Marks a task failed with the given error unless it already reached a
/// terminal state (e.g. it was canceled, or a stage recorded the failure
/// itself).
pub async fn fail_task_if_active(
  task_id: &str,
  msg: &str,
  detail: &str,
) -> anyhow::Result<()> {
  let task = get_task(task_id).await?;
  if !task.state.is_terminal() {
    log_task_error(&task, msg, detail).await?;
  }
  Ok(())
}

/// Cancellation is observed at stage boundaries: controllers call this
/// between polls and stop issuing new backend calls once it returns true.
pub async fn task_canceled(task_id: &str) -> bool {
  match get_task(task_id).await {
    Ok(task) => task.state == TaskState::Canceled,
    Err(e) => {
      warn!("failed to check task {task_id} for cancellation | {e:#}");
      false
    }
  }
}
