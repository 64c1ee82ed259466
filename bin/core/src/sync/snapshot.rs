//! The snapshot controller: copies matched repositories into prefixed
//! snapshot repositories and publishes them, with bounded concurrency.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use database::mungos::{find::find_collect, mongodb::bson::doc};
use pulp3_client::{
  Pulp3Client,
  remotes::get_remote,
  repositories::{copy_repo, get_repo},
  tasks::get_task as get_pulp_task,
};
use pulp_manager_client::entities::{
  pulp_manager_timestamp,
  repo::RepoKind,
  server::{PulpServer, PulpServerRepo},
  task::{Task, TaskState, TaskType},
};
use serde_json::json;

use super::{
  SNAPSHOT_PUBLISH_STAGE_NAME, SNAPSHOT_STAGE_NAME, fail_task_if_active,
  stage_detail, stage_detail_with_task, stage_error, task_canceled,
};
use crate::{
  config::core_config,
  errors::PulpManagerError,
  helpers::{
    WorkerIdentity, create_publication_from_repo_version,
    ensure_backend_distribution, ensure_backend_repository,
    get_pulp_server, get_server_repos, new_pulp_client, select_repos,
    task::{
      add_stage, claim_task, create_task, get_task, insert_task,
      link_repo_task, task_stages, transition_task, update_stage_detail,
      update_stage_error,
    },
  },
  reconcile::backend::reconcile,
  state::db_client,
};

/// Repo kinds whose plugins expose a copy endpoint.
pub const SUPPORTED_FOR_SNAPSHOT: &[RepoKind] =
  &[RepoKind::Rpm, RepoKind::Deb];

pub struct Snapshotter {
  server: PulpServer,
  client: Pulp3Client,
  worker: WorkerIdentity,
}

impl Snapshotter {
  pub async fn new(
    name: &str,
    worker: WorkerIdentity,
  ) -> anyhow::Result<Snapshotter> {
    let server = get_pulp_server(name).await?;
    let client = new_pulp_client(&server);
    Ok(Snapshotter {
      server,
      client,
      worker,
    })
  }

  /// Snapshots the repos of this backend matching the selection regexes
  /// into repos named `<prefix>-<source name>`.
  pub async fn snapshot_repos(
    &mut self,
    snapshot_prefix: &str,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    task_id: Option<&str>,
    allow_snapshot_reuse: bool,
  ) -> anyhow::Result<()> {
    let snapshot_prefix = normalize_prefix(snapshot_prefix);

    info!(
      "Starting snapshot for {}, snapshot_prefix: {snapshot_prefix}, \
       max_concurrent_snapshots: {:?}, regex_include {regex_include:?}, \
       regex_exclude {regex_exclude:?}, task_id: {task_id:?}, \
       allow_snapshot_reuse: {allow_snapshot_reuse}",
      self.server.name, self.server.max_concurrent_snapshots
    );

    let task = match task_id {
      Some(task_id) => claim_task(task_id, &self.worker).await?,
      None => {
        create_task(
          format!("{} repo snapshot", self.server.name),
          TaskType::RepoSnapshot,
          json!({
            "snapshot_prefix": &snapshot_prefix,
            "max_concurrent_snapshots":
              self.server.max_concurrent_snapshots,
            "regex_include": regex_include,
            "regex_exclude": regex_exclude,
            "allow_snapshot_reuse": allow_snapshot_reuse,
          }),
          Some(&self.worker),
        )
        .await?
      }
    };

    let result = self
      .run(
        &task,
        &snapshot_prefix,
        regex_include,
        regex_exclude,
        allow_snapshot_reuse,
      )
      .await;

    if let Err(e) = &result {
      error!(
        "failed to snapshot repos on {} | {e:#}",
        self.server.name
      );
      fail_task_if_active(
        &task.id,
        "failed to snapshot repos",
        &format!("{e:#}"),
      )
      .await?;
    }
    result
  }

  async fn run(
    &mut self,
    task: &Task,
    snapshot_prefix: &str,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    allow_snapshot_reuse: bool,
  ) -> anyhow::Result<()> {
    if !self.server.snapshot_supported {
      return Err(
        PulpManagerError::ValueError(format!(
          "pulp server {} not supported for repo snapshots",
          self.server.name
        ))
        .into(),
      );
    }

    if !allow_snapshot_reuse {
      self.snapshot_allowed(snapshot_prefix).await?;
    }

    self.do_reconcile(task).await?;

    let repos_to_snapshot = self
      .get_repos_for_snapshot(task, regex_include, regex_exclude)
      .await?;
    self
      .do_snapshot_repos(task, snapshot_prefix, repos_to_snapshot)
      .await
  }

  /// Rejects the run when a snapshot with this prefix already exists.
  async fn snapshot_allowed(
    &self,
    snapshot_prefix: &str,
  ) -> anyhow::Result<()> {
    let repos = find_collect(&db_client().repos, None, None)
      .await
      .context("failed to query repos")?;
    for repo in repos {
      if repo.name.starts_with(snapshot_prefix) {
        return Err(
          PulpManagerError::SnapshotError(format!(
            "snapshots with prefix {snapshot_prefix} already exist"
          ))
          .into(),
        );
      }
    }
    Ok(())
  }

  async fn do_reconcile(&mut self, task: &Task) -> anyhow::Result<()> {
    let stage = add_stage(
      &task.id,
      "reconcile repos",
      Some(stage_detail("reconciling repos on pulp server")),
    )
    .await?;
    match reconcile(&self.server, &self.client).await {
      Ok(_) => {
        update_stage_detail(
          &stage,
          stage_detail("completed repo reconcile"),
        )
        .await?;
        self.server = get_pulp_server(&self.server.name).await?;
        Ok(())
      }
      Err(e) => {
        update_stage_error(
          &stage,
          stage_error(
            "failed to reconcile repos on pulp server",
            &format!("{e:#}"),
          ),
        )
        .await?;
        Err(e)
      }
    }
  }

  /// Selects the repos to snapshot, dropping kinds without a copy
  /// endpoint and surfacing them in the stage detail.
  async fn get_repos_for_snapshot(
    &self,
    task: &Task,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
  ) -> anyhow::Result<Vec<PulpServerRepo>> {
    let stage = add_stage(
      &task.id,
      "find repos to snapshot",
      Some(stage_detail("getting repos to snapshot")),
    )
    .await?;

    let repos = get_server_repos(&self.server).await?;
    let matching =
      select_repos(&repos, regex_include, regex_exclude, true)?;

    let mut repos_to_snapshot = Vec::new();
    let mut repos_excluded = Vec::new();
    for repo in matching {
      if SUPPORTED_FOR_SNAPSHOT.contains(&repo.repo_type) {
        repos_to_snapshot.push(repo);
      } else {
        repos_excluded
          .push(format!("{} {}", repo.repo_name, repo.repo_type));
      }
    }

    let mut message = format!(
      "there are {} repos to snapshot. ",
      repos_to_snapshot.len()
    );
    if !repos_excluded.is_empty() {
      message.push_str(
        "The following repos will be excluded as not of a supported \
         type: ",
      );
      message.push_str(&repos_excluded.join(", "));
    }
    info!("{message}");
    update_stage_detail(&stage, stage_detail(message)).await?;

    Ok(repos_to_snapshot)
  }

  /// Starts the snapshot of one repo: makes sure the destination repo and
  /// its distribution exist, kicks off the copy, and returns the child
  /// task tracking it.
  async fn start_snapshot(
    &self,
    repo: &PulpServerRepo,
    repo_snapshot_name: &str,
  ) -> anyhow::Result<Task> {
    let now = pulp_manager_timestamp();
    let snapshot_task = insert_task(Task {
      id: String::new(),
      name: format!("snapshot {}", repo.repo_name),
      parent_task_id: None,
      task_type: TaskType::RepoSnapshot,
      task_args: json!({ "source_repo_href": repo.repo_href }),
      date_queued: now,
      date_started: Some(now),
      date_finished: None,
      state: TaskState::Running,
      worker_name: Some(self.worker.name.clone()),
      worker_job_id: self.worker.job_id.clone(),
      error: None,
      date_created: now,
      date_last_updated: now,
    })
    .await?;

    let started = async {
      let pulp_source_repo =
        get_repo(&self.client, &repo.repo_href).await?;
      let kind = RepoKind::from_href(&repo.repo_href)?;

      let pulp_snapshot_repo = ensure_backend_repository(
        &self.client,
        kind,
        repo_snapshot_name,
        pulp_source_repo.description.as_deref(),
      )
      .await?;
      ensure_backend_distribution(
        &self.client,
        kind,
        &pulp_snapshot_repo,
      )
      .await?;

      let dest_server_repo = self
        .ensure_snapshot_rows(repo, repo_snapshot_name, kind, &pulp_snapshot_repo.pulp_href)
        .await?;

      let pulp_task =
        copy_repo(&self.client, &pulp_source_repo, &pulp_snapshot_repo)
          .await?;

      let mut task_args = snapshot_task.task_args.clone();
      task_args["dest_repo_href"] =
        json!(pulp_snapshot_repo.pulp_href);
      task_args["repo_type"] = json!(kind);
      database::mungos::by_id::update_one_by_id(
        &db_client().tasks,
        &snapshot_task.id,
        database::mungos::update::Update::Set(doc! {
          "task_args":
            database::mungos::mongodb::bson::to_bson(&task_args)?,
          "date_last_updated": pulp_manager_timestamp(),
        }),
        None,
      )
      .await
      .context("failed to record snapshot task args")?;

      link_repo_task(&repo.id, &snapshot_task.id).await?;
      link_repo_task(&dest_server_repo, &snapshot_task.id).await?;

      add_stage(
        &snapshot_task.id,
        SNAPSHOT_STAGE_NAME,
        Some(stage_detail_with_task(
          format!("task in state {}", pulp_task.state),
          &pulp_task.pulp_href,
        )),
      )
      .await?;
      anyhow::Ok(())
    }
    .await;

    if let Err(e) = started {
      let message =
        format!("error occured snapshotting {}", repo.repo_name);
      error!("{message} | {e:#}");
      fail_task_if_active(
        &snapshot_task.id,
        &message,
        &format!("{e:#}"),
      )
      .await?;
    }

    get_task(&snapshot_task.id).await
  }

  /// Upserts the local Repo and PulpServerRepo rows for the snapshot
  /// destination, returning the PulpServerRepo id for task linking.
  async fn ensure_snapshot_rows(
    &self,
    source: &PulpServerRepo,
    snapshot_name: &str,
    kind: RepoKind,
    dest_repo_href: &str,
  ) -> anyhow::Result<String> {
    let db = db_client();
    let now = pulp_manager_timestamp();

    let repo_id = match db
      .repos
      .find_one(doc! { "name": snapshot_name })
      .await
      .context("failed to query repos")?
    {
      Some(repo) => repo.id,
      None => {
        let repo = pulp_manager_client::entities::repo::Repo {
          id: String::new(),
          name: snapshot_name.to_string(),
          repo_type: kind,
          date_created: now,
          date_last_updated: now,
        };
        db.repos
          .insert_one(&repo)
          .await
          .context("failed to insert snapshot repo")?
          .inserted_id
          .as_object_id()
          .context("repo insert returned no object id")?
          .to_hex()
      }
    };

    let existing = db
      .pulp_server_repos
      .find_one(doc! {
        "pulp_server_id": &self.server.id,
        "repo_id": &repo_id,
      })
      .await
      .context("failed to query pulp server repos")?;
    match existing {
      Some(server_repo) => Ok(server_repo.id),
      None => {
        let server_repo = PulpServerRepo {
          id: String::new(),
          pulp_server_id: self.server.id.clone(),
          repo_id,
          pulp_server_name: self.server.name.clone(),
          repo_name: snapshot_name.to_string(),
          repo_type: kind,
          repo_href: dest_repo_href.to_string(),
          remote_href: None,
          remote_feed: None,
          distribution_href: None,
          repo_sync_health: None,
          repo_sync_health_date: None,
          date_created: now,
          date_last_updated: now,
        };
        Ok(
          db.pulp_server_repos
            .insert_one(&server_repo)
            .await
            .context("failed to insert snapshot pulp server repo")?
            .inserted_id
            .as_object_id()
            .context("pulp server repo insert returned no object id")?
            .to_hex(),
        )
      }
    }
  }

  /// Publishes the destination repo. DEB snapshots inherit flatness from
  /// the source repo's remote.
  async fn start_publication(&self, task: &Task) -> anyhow::Result<()> {
    let dest_repo_href = task.task_args["dest_repo_href"]
      .as_str()
      .context("snapshot task is missing dest_repo_href")?;
    let source_repo_href = task.task_args["source_repo_href"]
      .as_str()
      .context("snapshot task is missing source_repo_href")?;

    let pulp_repo = get_repo(&self.client, dest_repo_href).await?;
    let kind = RepoKind::from_href(dest_repo_href)?;

    let mut is_flat_repo = false;
    if kind == RepoKind::Deb {
      let source_pulp_repo =
        get_repo(&self.client, source_repo_href).await?;
      if let Some(remote_href) = &source_pulp_repo.remote {
        let source_remote =
          get_remote(&self.client, remote_href).await?;
        is_flat_repo = source_remote.is_flat_repo();
      }
    }

    let latest = pulp_repo
      .latest_version_href
      .context("snapshot repo has no version to publish")?;
    let publication_task = create_publication_from_repo_version(
      &self.client,
      &latest,
      kind,
      is_flat_repo,
    )
    .await?;

    add_stage(
      &task.id,
      SNAPSHOT_PUBLISH_STAGE_NAME,
      Some(stage_detail_with_task(
        format!("task in state {}", publication_task.state),
        &publication_task.pulp_href,
      )),
    )
    .await?;
    Ok(())
  }

  /// Polls one snapshot child and advances copy → publish. Returns true
  /// when the child reached a terminal state.
  async fn progress_snapshot(&self, task: &Task) -> anyhow::Result<bool> {
    let stages = task_stages(&task.id).await?;
    let Some(current_stage) = stages.last() else {
      return Ok(true);
    };
    let detail = current_stage.detail.clone().unwrap_or(json!({}));
    let Some(task_href) = detail["task_href"].as_str() else {
      return Ok(true);
    };

    let result = async {
      let pulp_task = get_pulp_task(&self.client, task_href).await?;
      if !pulp_task.is_finished() {
        return anyhow::Ok(false);
      }

      let mut detail = detail.clone();
      detail["msg"] = json!(format!(
        "{} {}. ",
        current_stage.name, pulp_task.state
      ));
      update_stage_detail(current_stage, detail).await?;

      if !pulp_task.completed()
        || current_stage.name == SNAPSHOT_PUBLISH_STAGE_NAME
      {
        let state = if pulp_task.completed() {
          TaskState::Completed
        } else {
          TaskState::Failed
        };
        transition_task(task, state).await?;
        return Ok(true);
      }

      if current_stage.name == SNAPSHOT_STAGE_NAME {
        self.start_publication(task).await?;
      }
      Ok(false)
    }
    .await;

    match result {
      Ok(done) => Ok(done),
      Err(e) => {
        error!(
          "unexpected error occured progressing the snapshot for {} | {e:#}",
          task.id
        );
        fail_task_if_active(
          &task.id,
          "unexpected error occured progressing the snapshot",
          &format!("{e:#}"),
        )
        .await?;
        Err(e)
      }
    }
  }

  /// Bounded-concurrency loop over the snapshot children.
  async fn do_snapshot_repos(
    &self,
    parent_task: &Task,
    snapshot_prefix: &str,
    repos_to_snapshot: Vec<PulpServerRepo>,
  ) -> anyhow::Result<()> {
    let max_concurrent =
      self.server.max_concurrent_snapshots.unwrap_or(1) as usize;
    let poll_interval =
      Duration::from_secs(core_config().pulp.poll_interval_sec);
    let total = repos_to_snapshot.len();

    let snapshot_stage = add_stage(
      &parent_task.id,
      "snapshot repos",
      Some(stage_detail(format!("0/{total} snapshots completed"))),
    )
    .await?;

    let mut left = repos_to_snapshot;
    let mut in_progress: HashMap<String, Task> = HashMap::new();
    let mut failed: Vec<String> = Vec::new();

    while !left.is_empty() || !in_progress.is_empty() {
      if task_canceled(&parent_task.id).await {
        info!(
          "snapshot run for {} canceled, not starting remaining copies",
          self.server.name
        );
        return Ok(());
      }

      while in_progress.len() < max_concurrent && !left.is_empty() {
        let repo = left.remove(0);
        let repo_snapshot_name =
          format!("{snapshot_prefix}{}", repo.repo_name);
        match self.start_snapshot(&repo, &repo_snapshot_name).await {
          Ok(snapshot_task)
            if snapshot_task.state == TaskState::Running =>
          {
            in_progress.insert(snapshot_task.id.clone(), snapshot_task);
          }
          Ok(_) => failed.push(repo.repo_name.clone()),
          Err(e) => {
            error!(
              "Unexpected error in starting snapshot for {} | {e:#}",
              repo.repo_name
            );
            failed.push(repo.repo_name.clone());
          }
        }
      }

      let ids: Vec<String> = in_progress.keys().cloned().collect();
      for id in ids {
        let task = get_task(&id).await?;
        match self.progress_snapshot(&task).await {
          Ok(true) => {
            if get_task(&id).await?.state != TaskState::Completed {
              failed.push(task.name.clone());
            }
            in_progress.remove(&id);
          }
          Ok(false) => {}
          Err(_) => {
            failed.push(task.name.clone());
            in_progress.remove(&id);
          }
        }
      }

      let completed = total - left.len() - in_progress.len();
      update_stage_detail(
        &snapshot_stage,
        stage_detail(format!(
          "{completed}/{total} snapshots completed"
        )),
      )
      .await?;

      if left.is_empty() && in_progress.is_empty() {
        break;
      }
      tokio::time::sleep(poll_interval).await;
    }

    let parent = get_task(&parent_task.id).await?;
    if parent.state.is_terminal() {
      return Ok(());
    }
    if failed.is_empty() {
      transition_task(&parent, TaskState::Completed).await?;
    } else {
      let message =
        format!("the following repos failed {}", failed.join(","));
      crate::helpers::task::log_task_error(&parent, &message, "")
        .await?;
    }
    Ok(())
  }
}

/// Snapshot prefixes always end with a dash so the source name reads
/// cleanly out of the snapshot name.
fn normalize_prefix(snapshot_prefix: &str) -> String {
  if snapshot_prefix.ends_with('-') {
    snapshot_prefix.to_string()
  } else {
    let normalized = format!("{snapshot_prefix}-");
    info!("snapshot prefix updated to {normalized}");
    normalized
  }
}

/// Job entry point used by the worker.
pub async fn snapshot_repos(
  pulp_server: &str,
  snapshot_prefix: &str,
  regex_include: Option<&str>,
  regex_exclude: Option<&str>,
  task_id: Option<&str>,
  allow_snapshot_reuse: bool,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  let mut snapshotter = Snapshotter::new(pulp_server, worker).await?;
  snapshotter
    .snapshot_repos(
      snapshot_prefix,
      regex_include,
      regex_exclude,
      task_id,
      allow_snapshot_reuse,
    )
    .await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefix_is_normalized_to_trailing_dash() {
    assert_eq!(normalize_prefix("snap1"), "snap1-");
    assert_eq!(normalize_prefix("snap1-"), "snap1-");
  }

  #[test]
  fn container_repos_are_not_snapshot_supported() {
    assert!(!SUPPORTED_FOR_SNAPSHOT.contains(&RepoKind::Container));
    assert!(SUPPORTED_FOR_SNAPSHOT.contains(&RepoKind::Rpm));
    assert!(SUPPORTED_FOR_SNAPSHOT.contains(&RepoKind::Deb));
  }
}
