//! Bulk repo removal: deletes the distribution, repository and remote of
//! every matched repo, sequentially, with an optional dry run that only
//! logs the intent.

use anyhow::Context;
use pulp3_client::Pulp3Client;
use pulp_manager_client::entities::{
  server::{PulpServer, PulpServerRepo},
  task::{Task, TaskState, TaskType},
};
use serde_json::json;

use super::{fail_task_if_active, stage_detail, task_canceled};
use crate::{
  errors::PulpManagerError,
  helpers::{
    WorkerIdentity, delete_by_href_monitor, get_pulp_server,
    get_server_repos, new_pulp_client, select_repos,
    task::{
      add_stage, claim_task, complete_task, create_task, get_task,
      update_stage_detail,
    },
  },
  reconcile::backend::reconcile,
};

/// Deletes of backend artifacts poll fast and give up sooner than syncs.
const DELETE_POLL_INTERVAL_SEC: u64 = 2;
const DELETE_MAX_WAIT_COUNT: u32 = 200;

pub struct RepoRemover {
  server: PulpServer,
  client: Pulp3Client,
  worker: WorkerIdentity,
}

impl RepoRemover {
  pub async fn new(
    name: &str,
    worker: WorkerIdentity,
  ) -> anyhow::Result<RepoRemover> {
    let server = get_pulp_server(name).await?;
    let client = new_pulp_client(&server);
    Ok(RepoRemover {
      server,
      client,
      worker,
    })
  }

  pub async fn remove_repos(
    &mut self,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    dry_run: bool,
    task_id: Option<&str>,
  ) -> anyhow::Result<()> {
    info!(
      "{}Starting removal of repositories on {}",
      if dry_run { "Dry run: " } else { "" },
      self.server.name
    );

    if regex_include.is_none() && regex_exclude.is_none() {
      return Err(
        PulpManagerError::ValueError(
          "Must specify at least one of regex_include or regex_exclude"
            .to_string(),
        )
        .into(),
      );
    }

    let task = match task_id {
      Some(task_id) => claim_task(task_id, &self.worker).await?,
      None => {
        create_task(
          format!("{} repo removal", self.server.name),
          TaskType::RepoRemoval,
          json!({
            "regex_include": regex_include,
            "regex_exclude": regex_exclude,
            "dry_run": dry_run,
          }),
          Some(&self.worker),
        )
        .await?
      }
    };

    let result = self
      .run(&task, regex_include, regex_exclude, dry_run)
      .await;

    if let Err(e) = &result {
      error!(
        "An error occurred during repository removal | {e:#}"
      );
      fail_task_if_active(
        &task.id,
        "Failed to remove repositories",
        &format!("{e:#}"),
      )
      .await?;
    }
    result
  }

  async fn run(
    &mut self,
    task: &Task,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    dry_run: bool,
  ) -> anyhow::Result<()> {
    let repos_to_remove = self
      .get_repos_for_removal(task, regex_include, regex_exclude, dry_run)
      .await?;
    self.do_remove_repos(task, &repos_to_remove, dry_run).await?;

    let task = get_task(&task.id).await?;
    if !task.state.is_terminal() {
      complete_task(&task).await?;
    }
    Ok(())
  }

  async fn get_repos_for_removal(
    &self,
    task: &Task,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    dry_run: bool,
  ) -> anyhow::Result<Vec<PulpServerRepo>> {
    let stage_name = if dry_run {
      "Getting Repos for Removal (Dry Run)"
    } else {
      "Getting Repos for Removal"
    };
    let stage = add_stage(
      &task.id,
      stage_name,
      Some(stage_detail(
        "Getting repos for removal based on regex patterns",
      )),
    )
    .await?;

    let repos = get_server_repos(&self.server).await?;
    // Removal also covers repos with no remote, e.g. orphaned snapshots.
    let matching =
      select_repos(&repos, regex_include, regex_exclude, false)?;

    if matching.is_empty() {
      return Err(
        PulpManagerError::ValueError(
          "No repositories found matching the regex pattern"
            .to_string(),
        )
        .into(),
      );
    }

    let message = format!(
      "Found matching repositories: {}",
      matching
        .iter()
        .map(|repo| repo.repo_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
    );
    info!("{message}");
    update_stage_detail(&stage, stage_detail(message)).await?;

    Ok(matching)
  }

  /// Deletes distribution → repository → remote for each repo, each call
  /// polled to completion before the next. A failed repo does not stop
  /// the batch.
  async fn do_remove_repos(
    &mut self,
    task: &Task,
    repos_to_remove: &[PulpServerRepo],
    dry_run: bool,
  ) -> anyhow::Result<()> {
    let stage_name = if dry_run {
      "Removing Repositories and their Distributions/Remotes (Dry Run)"
    } else {
      "Removing Repositories and their Distributions/Remotes"
    };
    let stage = add_stage(
      &task.id,
      stage_name,
      Some(stage_detail(format!(
        "Preparing to remove {} repositories, distributions, and \
         remotes.",
        repos_to_remove.len()
      ))),
    )
    .await?;

    let mut successful_deletions = 0;
    let mut failed_deletions = 0;

    if dry_run {
      let repo_hrefs: Vec<&str> = repos_to_remove
        .iter()
        .map(|repo| repo.repo_href.as_str())
        .collect();
      let distribution_hrefs: Vec<&str> = repos_to_remove
        .iter()
        .filter_map(|repo| repo.distribution_href.as_deref())
        .collect();
      let remote_hrefs: Vec<&str> = repos_to_remove
        .iter()
        .filter_map(|repo| repo.remote_href.as_deref())
        .collect();
      info!(
        "Dry run: Would remove distributions: {}, repositories: {}, \
         remotes: {}",
        distribution_hrefs.join(", "),
        repo_hrefs.join(", "),
        remote_hrefs.join(", ")
      );
      successful_deletions = repos_to_remove.len();
    } else {
      for repo in repos_to_remove {
        if task_canceled(&task.id).await {
          info!(
            "repo removal on {} canceled, stopping after {} deletions",
            self.server.name, successful_deletions
          );
          return Ok(());
        }
        match self.remove_one(repo).await {
          Ok(()) => {
            info!(
              "Successfully removed distribution, repository, and \
               remote for {}",
              repo.repo_name
            );
            successful_deletions += 1;
          }
          Err(e) => {
            error!(
              "Error during removal for {}: {e:#}",
              repo.repo_name
            );
            failed_deletions += 1;
          }
        }
      }
    }

    let mut completion_msg = format!(
      "Completed removing repositories, distributions, and remotes. \
       Successfully removed {successful_deletions}, failed to remove \
       {failed_deletions}"
    );
    if dry_run {
      completion_msg.push_str(" (Dry Run)");
    }
    info!("{completion_msg}");
    update_stage_detail(&stage, stage_detail(completion_msg)).await?;

    if !dry_run && successful_deletions > 0 {
      reconcile(&self.server, &self.client)
        .await
        .context("reconciliation after removals failed")?;
      self.server = get_pulp_server(&self.server.name).await?;
      info!("Reconciliation completed after removals.");
    }

    Ok(())
  }

  async fn remove_one(
    &self,
    repo: &PulpServerRepo,
  ) -> anyhow::Result<()> {
    if let Some(distribution_href) = &repo.distribution_href {
      delete_by_href_monitor(
        &self.client,
        distribution_href,
        DELETE_POLL_INTERVAL_SEC,
        DELETE_MAX_WAIT_COUNT,
      )
      .await?;
    }
    delete_by_href_monitor(
      &self.client,
      &repo.repo_href,
      DELETE_POLL_INTERVAL_SEC,
      DELETE_MAX_WAIT_COUNT,
    )
    .await?;
    if let Some(remote_href) = &repo.remote_href {
      delete_by_href_monitor(
        &self.client,
        remote_href,
        DELETE_POLL_INTERVAL_SEC,
        DELETE_MAX_WAIT_COUNT,
      )
      .await?;
    }
    Ok(())
  }
}

/// Job entry point used by the worker.
pub async fn remove_repos(
  pulp_server: &str,
  regex_include: Option<&str>,
  regex_exclude: Option<&str>,
  dry_run: bool,
  task_id: Option<&str>,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  let mut remover = RepoRemover::new(pulp_server, worker).await?;
  remover
    .remove_repos(regex_include, regex_exclude, dry_run, task_id)
    .await
}
