//! The worker process: pulls ready jobs from the named queues and runs
//! the matching controller, enforcing the job-level `max_runtime`.

use std::time::Duration;

use anyhow::Context;
use job_queue::{Job, JobKind};
use serde::Deserialize;
use serde_json::Value;

use crate::{
  helpers::WorkerIdentity,
  state::queue_client,
  sync::{
    content::remove_repo_content, removal::remove_repos,
    repo_sync::sync_repos, snapshot::snapshot_repos,
  },
};

/// How long an idle worker sleeps before checking its queues again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct SyncJobArgs {
  name: String,
  max_concurrent_syncs: u16,
  #[serde(default)]
  regex_include: Option<String>,
  #[serde(default)]
  regex_exclude: Option<String>,
  #[serde(default)]
  source_pulp_server_name: Option<String>,
  #[serde(default)]
  sync_options: Option<Value>,
  #[serde(default)]
  task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotJobArgs {
  name: String,
  snapshot_prefix: String,
  #[serde(default)]
  allow_snapshot_reuse: bool,
  #[serde(default)]
  regex_include: Option<String>,
  #[serde(default)]
  regex_exclude: Option<String>,
  #[serde(default)]
  task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemovalJobArgs {
  name: String,
  #[serde(default)]
  regex_include: Option<String>,
  #[serde(default)]
  regex_exclude: Option<String>,
  #[serde(default = "default_dry_run")]
  dry_run: bool,
  #[serde(default)]
  task_id: Option<String>,
}

fn default_dry_run() -> bool {
  true
}

#[derive(Debug, Deserialize)]
struct RemoveContentJobArgs {
  name: String,
  repo_name: String,
  content_href: String,
  task_id: String,
  #[serde(default)]
  force_publish: bool,
}

#[derive(Debug, Deserialize)]
struct RegisterRepoConfigsJobArgs {
  name: String,
  #[serde(default)]
  regex_include: Option<String>,
  #[serde(default)]
  regex_exclude: Option<String>,
}

/// Runs the worker loop until the process is stopped.
pub async fn run(
  worker_name: String,
  queues: Vec<String>,
) -> anyhow::Result<()> {
  info!(
    "worker {worker_name} watching queues: {}",
    queues.join(", ")
  );
  loop {
    let mut worked = false;
    for queue in &queues {
      let job = match queue_client()
        .fetch_next(queue, &worker_name)
        .await
      {
        Ok(Some(job)) => job,
        Ok(None) => continue,
        Err(e) => {
          error!("failed to fetch job from queue {queue} | {e:#}");
          continue;
        }
      };
      worked = true;
      execute_job(job, &worker_name).await;
    }
    if !worked {
      tokio::time::sleep(IDLE_POLL_INTERVAL).await;
    }
  }
}

async fn execute_job(job: Job, worker_name: &str) {
  info!("running job {} ({})", job.id, job.kind);
  let worker = WorkerIdentity {
    name: worker_name.to_string(),
    job_id: Some(job.id.clone()),
  };

  let work = dispatch(&job, worker);
  let result = match job.timeout {
    Some(timeout) => {
      match tokio::time::timeout(Duration::from_secs(timeout), work)
        .await
      {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
          "job exceeded max_runtime of {timeout} seconds"
        )),
      }
    }
    None => work.await,
  };

  let exc_info = match &result {
    Ok(()) => None,
    Err(e) => {
      error!("job {} failed | {e:#}", job.id);
      Some(format!("{e:#}"))
    }
  };
  if let Err(e) = queue_client().finish_job(&job, exc_info).await {
    error!("failed to record outcome of job {} | {e:#}", job.id);
  }
}

async fn dispatch(
  job: &Job,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  match job.kind {
    JobKind::SyncRepos => {
      let args: SyncJobArgs =
        serde_json::from_value(job.args.clone())
          .context("invalid sync_repos job args")?;
      sync_repos(
        &args.name,
        args.max_concurrent_syncs,
        args.regex_include.as_deref(),
        args.regex_exclude.as_deref(),
        args.source_pulp_server_name.as_deref(),
        args.sync_options,
        args.task_id.as_deref(),
        worker,
      )
      .await
    }
    JobKind::SnapshotRepos => {
      let args: SnapshotJobArgs =
        serde_json::from_value(job.args.clone())
          .context("invalid snapshot_repos job args")?;
      snapshot_repos(
        &args.name,
        &args.snapshot_prefix,
        args.regex_include.as_deref(),
        args.regex_exclude.as_deref(),
        args.task_id.as_deref(),
        args.allow_snapshot_reuse,
        worker,
      )
      .await
    }
    JobKind::RemoveRepos => {
      let args: RemovalJobArgs =
        serde_json::from_value(job.args.clone())
          .context("invalid remove_repos job args")?;
      remove_repos(
        &args.name,
        args.regex_include.as_deref(),
        args.regex_exclude.as_deref(),
        args.dry_run,
        args.task_id.as_deref(),
        worker,
      )
      .await
    }
    JobKind::RemoveRepoContent => {
      let args: RemoveContentJobArgs =
        serde_json::from_value(job.args.clone())
          .context("invalid remove_repo_content job args")?;
      remove_repo_content(
        &args.name,
        &args.repo_name,
        &args.content_href,
        &args.task_id,
        args.force_publish,
        worker,
      )
      .await
    }
    JobKind::RegisterRepoConfigs => {
      let args: RegisterRepoConfigsJobArgs =
        serde_json::from_value(job.args.clone())
          .context("invalid register_repo_configs job args")?;
      register_repo_configs(
        &args.name,
        args.regex_include.as_deref(),
        args.regex_exclude.as_deref(),
        worker,
      )
      .await
    }
  }
}

/// Scheduled repo config registration: refreshes the local snapshot of the
/// backend so newly registered repos are picked up. The include / exclude
/// regexes are recorded with the task for the operator's benefit.
async fn register_repo_configs(
  pulp_server: &str,
  regex_include: Option<&str>,
  regex_exclude: Option<&str>,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  use pulp_manager_client::entities::task::TaskType;
  use serde_json::json;

  use crate::{
    helpers::{
      get_pulp_server, new_pulp_client,
      task::{add_stage, complete_task, create_task, update_stage_detail},
    },
    reconcile::backend::reconcile,
    sync::{fail_task_if_active, stage_detail},
  };

  let server = get_pulp_server(pulp_server).await?;
  let client = new_pulp_client(&server);
  let task = create_task(
    format!("{pulp_server} repo config registration"),
    TaskType::RepoCreationFromGit,
    json!({
      "name": pulp_server,
      "regex_include": regex_include,
      "regex_exclude": regex_exclude,
    }),
    Some(&worker),
  )
  .await?;

  let stage = add_stage(
    &task.id,
    "reconcile repos",
    Some(stage_detail("registering repo configs on pulp server")),
  )
  .await?;

  match reconcile(&server, &client).await {
    Ok(summary) => {
      update_stage_detail(
        &stage,
        json!({
          "msg": "repo config registration completed",
          "summary": summary,
        }),
      )
      .await?;
      complete_task(&task).await?;
      Ok(())
    }
    Err(e) => {
      fail_task_if_active(
        &task.id,
        "repo config registration failed",
        &format!("{e:#}"),
      )
      .await?;
      Err(e)
    }
  }
}
