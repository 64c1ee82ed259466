//! Removes a single content unit from a repo's latest version, optionally
//! re-publishing. If the modify creates no new repository version and
//! `force_publish` is off, the publish stage is skipped.

use std::time::Duration;

use anyhow::Context;
use database::mungos::mongodb::bson::doc;
use pulp3_client::{
  remotes::get_remote,
  repositories::{get_repo, modify_repo},
  tasks::get_task as get_pulp_task,
};
use pulp_manager_client::entities::repo::RepoKind;

use super::{fail_task_if_active, stage_detail_with_task};
use crate::{
  config::core_config,
  errors::PulpManagerError,
  helpers::{
    WorkerIdentity, create_publication_from_repo_version,
    new_pulp_client,
    task::{
      add_stage, claim_task, complete_task, get_task, link_repo_task,
      update_stage_detail,
    },
  },
  state::db_client,
};

/// Removes the given content unit from the latest version of the repo.
/// The task with `task_id` must already exist; this runs inside the
/// worker job the control plane enqueued.
pub async fn remove_repo_content(
  pulp_server_name: &str,
  repo_name: &str,
  content_href: &str,
  task_id: &str,
  force_publish: bool,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  debug!("retrieving task with {task_id}");
  let task = claim_task(task_id, &worker).await?;

  let result = run(
    pulp_server_name,
    repo_name,
    content_href,
    &task.id,
    force_publish,
  )
  .await;

  match result {
    Ok(()) => {
      debug!("remove repo content completed successfully");
      let task = get_task(&task.id).await?;
      complete_task(&task).await?;
      Ok(())
    }
    Err(e) => {
      error!(
        "unexpected error occurred in remove repo content: {e:#}"
      );
      fail_task_if_active(&task.id, "remove repo content failed", &format!("{e:#}"))
        .await?;
      Err(e)
    }
  }
}

async fn run(
  pulp_server_name: &str,
  repo_name: &str,
  content_href: &str,
  task_id: &str,
  force_publish: bool,
) -> anyhow::Result<()> {
  debug!(
    "searching db for repo {repo_name} on {pulp_server_name}"
  );
  add_stage(task_id, "finding repo on pulp server", None).await?;

  let server_repo = db_client()
    .pulp_server_repos
    .find_one(doc! {
      "pulp_server_name": pulp_server_name,
      "repo_name": repo_name,
    })
    .await
    .context("failed to query pulp server repos")?
    .ok_or_else(|| {
      PulpManagerError::EntityNotFound(format!(
        "repo with name {repo_name} on pulp server {pulp_server_name} \
         not found"
      ))
    })?;
  debug!("found pulp server repo with id {}", server_repo.id);
  link_repo_task(&server_repo.id, &task_id.to_string()).await?;

  let server = crate::helpers::get_pulp_server(pulp_server_name).await?;
  let client = new_pulp_client(&server);
  let pulp_repo = get_repo(&client, &server_repo.repo_href).await?;
  let latest = pulp_repo
    .latest_version_href
    .clone()
    .context("repo has no versions")?;

  let modify_task = modify_repo(
    &client,
    &pulp_repo,
    &latest,
    None,
    Some(&[content_href.to_string()]),
  )
  .await?;
  debug!(
    "modify task started with href {}",
    modify_task.pulp_href
  );
  let modify_stage = add_stage(
    task_id,
    "modifying repo content",
    Some(stage_detail_with_task(
      format!("task in state {}", modify_task.state),
      &modify_task.pulp_href,
    )),
  )
  .await?;

  let poll_interval =
    Duration::from_secs(core_config().pulp.poll_interval_sec);
  let mut modify_task = modify_task;
  while !modify_task.is_finished() {
    tokio::time::sleep(poll_interval).await;
    modify_task =
      get_pulp_task(&client, &modify_task.pulp_href).await?;
    update_stage_detail(
      &modify_stage,
      stage_detail_with_task(
        format!("task in state {}", modify_task.state),
        &modify_task.pulp_href,
      ),
    )
    .await?;
  }

  debug!(
    "modify task {} end state {}",
    modify_task.pulp_href, modify_task.state
  );
  if !modify_task.completed() {
    return Err(
      PulpManagerError::PulpTaskError(format!(
        "modify task {} failed",
        modify_task.pulp_href
      ))
      .into(),
    );
  }

  if modify_task.created_resources.is_empty() && !force_publish {
    debug!("repo publication step being skipped");
    add_stage(
      task_id,
      "repo publication skipped as no new resources created from modify",
      None,
    )
    .await?;
    return Ok(());
  }

  let kind = RepoKind::from_href(&pulp_repo.pulp_href)?;
  let mut is_flat_repo = false;
  if kind == RepoKind::Deb
    && let Some(remote_href) = &server_repo.remote_href
  {
    let remote = get_remote(&client, remote_href).await?;
    is_flat_repo = remote.is_flat_repo();
  }

  let repo_version_to_publish = modify_task
    .created_resources
    .first()
    .cloned()
    .unwrap_or(latest);

  let publication_task = create_publication_from_repo_version(
    &client,
    &repo_version_to_publish,
    kind,
    is_flat_repo,
  )
  .await?;
  debug!(
    "publish task started with href {}",
    publication_task.pulp_href
  );
  let publication_stage = add_stage(
    task_id,
    format!("publishing repo version {repo_version_to_publish}"),
    Some(stage_detail_with_task(
      format!("task in state {}", publication_task.state),
      &publication_task.pulp_href,
    )),
  )
  .await?;

  let mut publication_task = publication_task;
  while !publication_task.is_finished() {
    tokio::time::sleep(poll_interval).await;
    publication_task =
      get_pulp_task(&client, &publication_task.pulp_href).await?;
    update_stage_detail(
      &publication_stage,
      stage_detail_with_task(
        format!("task in state {}", publication_task.state),
        &publication_task.pulp_href,
      ),
    )
    .await?;
  }

  debug!(
    "publish task {} end state {}",
    publication_task.pulp_href, publication_task.state
  );
  if !publication_task.completed() {
    return Err(
      PulpManagerError::PulpTaskError(format!(
        "publication task {} failed",
        publication_task.pulp_href
      ))
      .into(),
    );
  }

  Ok(())
}
