//! The scheduler process: one loop that materialises due cron jobs into
//! the ready queues and reaps tasks stuck in running past their
//! max_runtime.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use database::mungos::{
  find::find_collect,
  mongodb::bson::doc,
};
use pulp_manager_client::entities::{
  pulp_manager_timestamp,
  task::TaskState,
};

use crate::{
  config::core_config,
  helpers::{parse_duration, task::log_task_error},
  state::{db_client, queue_client},
};

pub async fn run(
  interval: f64,
  burst: bool,
  pid: Option<PathBuf>,
) -> anyhow::Result<()> {
  if let Some(pid_file) = pid {
    std::fs::write(&pid_file, std::process::id().to_string())
      .with_context(|| {
        format!("failed to write pid file {pid_file:?}")
      })?;
  }

  info!("scheduler started, interval: {interval}s, burst: {burst}");
  loop {
    tick().await;
    if burst {
      return Ok(());
    }
    tokio::time::sleep(Duration::from_secs_f64(interval)).await;
  }
}

async fn tick() {
  let queues = match queue_client().queues().await {
    Ok(queues) => queues,
    Err(e) => {
      error!("failed to list queues | {e:#}");
      return;
    }
  };
  for queue in queues {
    match queue_client().enqueue_due_scheduled(&queue).await {
      Ok(0) => {}
      Ok(fired) => {
        info!("enqueued {fired} scheduled jobs on {queue}")
      }
      Err(e) => {
        error!("failed to enqueue scheduled jobs on {queue} | {e:#}")
      }
    }
  }

  if let Err(e) = reap_stuck_tasks().await {
    error!("stuck task reaper failed | {e:#}");
  }
}

/// Fails running tasks whose worker died without a chance to update them:
/// anything running longer than its max_runtime plus a grace period.
async fn reap_stuck_tasks() -> anyhow::Result<()> {
  let config = core_config();
  let default_max_runtime =
    parse_duration(&config.pulp.default_max_runtime)?;
  let grace = Duration::from_secs(config.pulp.reaper_grace_sec);
  let now = pulp_manager_timestamp();

  let running = find_collect(
    &db_client().tasks,
    doc! { "state": TaskState::Running.value() },
    None,
  )
  .await
  .context("failed to query running tasks")?;

  for task in running {
    let Some(date_started) = task.date_started else {
      continue;
    };
    let max_runtime = task.task_args["max_runtime"]
      .as_str()
      .and_then(|literal| parse_duration(literal).ok())
      .unwrap_or(default_max_runtime);
    let deadline =
      date_started + (max_runtime + grace).as_millis() as i64;
    if now <= deadline {
      continue;
    }
    warn!(
      "task {} has been running since {date_started} and exceeded its \
       max runtime, marking failed",
      task.id
    );
    log_task_error(
      &task,
      "task exceeded max runtime",
      &format!(
        "running since {date_started} with max runtime {max_runtime:?}"
      ),
    )
    .await?;
  }
  Ok(())
}
