//! The repo group sync controller. A parent `repo_group_sync` task fans
//! out into one `repo_sync` child per selected repo; children cycle
//! through sync → remove banned packages → publish against the backend,
//! with at most `max_concurrent_syncs` in flight.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use database::mungos::{
  by_id::update_one_by_id, mongodb::bson::doc, update::Update,
};
use pulp3_client::{
  Pulp3Client,
  content::get_content_by_href,
  publications::get_all_publications,
  remotes::{get_remote, new_remote},
  repositories::{get_repo, get_repo_version, sync_repo},
  resources::Repository,
  tasks::get_task as get_pulp_task,
};
use pulp_manager_client::entities::{
  pulp_manager_timestamp,
  repo::{RepoHealthStatus, RepoKind},
  server::{PulpServer, PulpServerRepo},
  task::{Task, TaskState, TaskType},
};
use serde_json::{Value, json};

use super::{
  PUBLISH_STAGE_NAME, REMOVE_BANNED_PACKAGES_STAGE_NAME,
  SYNC_STAGE_NAME, fail_task_if_active, stage_detail,
  stage_detail_with_task, stage_error, task_canceled,
};
use crate::{
  config::core_config,
  helpers::{
    WorkerIdentity, classify_health,
    create_publication_from_repo_version, ensure_backend_distribution,
    ensure_backend_repository, get_pulp_server, get_server_repos,
    new_pulp_client, rollup_health, select_repos,
    task::{
      add_stage, claim_task, complete_task, create_task, get_task,
      insert_task, link_repo_task, linked_task_states, task_stages,
      touch_task, transition_task, update_stage_detail,
      update_stage_error,
    },
  },
  reconcile::backend::reconcile,
  state::db_client,
};

pub struct RepoSyncher {
  server: PulpServer,
  client: Pulp3Client,
  worker: WorkerIdentity,
}

impl RepoSyncher {
  pub async fn new(
    name: &str,
    worker: WorkerIdentity,
  ) -> anyhow::Result<RepoSyncher> {
    let server = get_pulp_server(name).await?;
    let client = new_pulp_client(&server);
    Ok(RepoSyncher {
      server,
      client,
      worker,
    })
  }

  /// Syncs the repos of this backend matching the selection regexes.
  #[allow(clippy::too_many_arguments)]
  pub async fn sync_repos(
    &mut self,
    max_concurrent_syncs: u16,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    source_pulp_server_name: Option<&str>,
    sync_options: Option<Value>,
    task_id: Option<&str>,
  ) -> anyhow::Result<()> {
    info!(
      "Starting sync repos for {}, max_concurrent_syncs \
       {max_concurrent_syncs}, regex_include {regex_include:?}, \
       regex_exclude {regex_exclude:?}, sync_options: {sync_options:?}, \
       task_id: {task_id:?}",
      self.server.name
    );

    let task = match task_id {
      Some(task_id) => claim_task(task_id, &self.worker).await?,
      None => {
        self
          .create_task_entry(
            max_concurrent_syncs,
            regex_include,
            regex_exclude,
            source_pulp_server_name,
            sync_options.as_ref(),
          )
          .await?
      }
    };

    let result = self
      .run(
        &task,
        max_concurrent_syncs,
        regex_include,
        regex_exclude,
        source_pulp_server_name,
        sync_options.unwrap_or_else(|| json!({})),
      )
      .await;

    if let Err(e) = &result {
      error!(
        "unexpected error occured synching repos on {} | {e:#}",
        self.server.name
      );
      fail_task_if_active(
        &task.id,
        "unexpected error occured synching repos",
        &format!("{e:#}"),
      )
      .await?;
    }
    result
  }

  async fn run(
    &mut self,
    task: &Task,
    max_concurrent_syncs: u16,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    source_pulp_server_name: Option<&str>,
    sync_options: Value,
  ) -> anyhow::Result<()> {
    if let Some(source) = source_pulp_server_name {
      info!(
        "{} is set to sync from {source}, registering repos",
        self.server.name
      );
      add_stage(
        &task.id,
        format!("registering repos from {source}"),
        None,
      )
      .await?;
      self
        .register_repos_from_master(source, regex_include, regex_exclude)
        .await
        .with_context(|| {
          format!("failed to register repos from {source}")
        })?;
      info!("successfully registered repos from {source}");
    }

    self.reconcile_repos(task).await?;

    info!("getting repos to sync for {}", self.server.name);
    let repos = get_server_repos(&self.server).await?;
    let repos_to_sync =
      select_repos(&repos, regex_include, regex_exclude, true)?;
    info!("There are {} repos to sync", repos_to_sync.len());

    let repo_tasks =
      self.generate_tasks(&repos_to_sync, &task.id).await?;

    info!("starting repo syncs on {}", self.server.name);
    let canceled = self
      .do_sync_repos(
        task,
        repo_tasks,
        max_concurrent_syncs as usize,
        &sync_options,
      )
      .await?;
    if canceled {
      info!(
        "repo sync for {} canceled, not starting remaining work",
        self.server.name
      );
      return Ok(());
    }
    info!("repo syncs completed for {}", self.server.name);

    self.calculate_repo_health(task, &repos_to_sync).await?;
    self.calculate_health_rollup(task).await?;

    let task = get_task(&task.id).await?;
    if !task.state.is_terminal() {
      complete_task(&task).await?;
    }
    Ok(())
  }

  async fn create_task_entry(
    &self,
    max_concurrent_syncs: u16,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
    source_pulp_server_name: Option<&str>,
    sync_options: Option<&Value>,
  ) -> anyhow::Result<Task> {
    create_task(
      format!("repo sync {}", self.server.name),
      TaskType::RepoGroupSync,
      json!({
        "name": self.server.name,
        "regex_include": regex_include,
        "regex_exclude": regex_exclude,
        "max_concurrent_syncs": max_concurrent_syncs,
        "source_pulp_server_name": source_pulp_server_name,
        "sync_options": sync_options,
      }),
      Some(&self.worker),
    )
    .await
  }

  /// Pre-step for the slave-from-master topology: any repo the source
  /// backend has (within the selection) that is missing here gets its
  /// repository, remote and distribution created on this backend, copying
  /// the feed config from the source's records. The reconcile that follows
  /// imports the rows.
  async fn register_repos_from_master(
    &self,
    source_name: &str,
    regex_include: Option<&str>,
    regex_exclude: Option<&str>,
  ) -> anyhow::Result<()> {
    let source = get_pulp_server(source_name).await?;
    let source_repos = get_server_repos(&source).await?;
    let source_repos =
      select_repos(&source_repos, regex_include, regex_exclude, true)?;

    let local_repos = get_server_repos(&self.server).await?;
    let local_names: Vec<&str> = local_repos
      .iter()
      .map(|repo| repo.repo_name.as_str())
      .collect();

    for source_repo in source_repos {
      if local_names.contains(&source_repo.repo_name.as_str()) {
        continue;
      }
      debug!(
        "registering {} on {} from {source_name}",
        source_repo.repo_name, self.server.name
      );
      let repository = ensure_backend_repository(
        &self.client,
        source_repo.repo_type,
        &source_repo.repo_name,
        None,
      )
      .await?;
      if let Some(feed) = &source_repo.remote_feed {
        new_remote(
          &self.client,
          source_repo.repo_type,
          &source_repo.repo_name,
          feed,
          None,
        )
        .await
        .with_context(|| {
          format!("failed to create remote for {}", source_repo.repo_name)
        })?;
      }
      ensure_backend_distribution(
        &self.client,
        source_repo.repo_type,
        &repository,
      )
      .await?;
    }
    Ok(())
  }

  async fn reconcile_repos(&mut self, task: &Task) -> anyhow::Result<()> {
    debug!("starting reconcile of repos for {}", self.server.name);
    let stage = add_stage(
      &task.id,
      "reconcile repos",
      Some(stage_detail("reconcile repos on pulp server")),
    )
    .await?;

    match reconcile(&self.server, &self.client).await {
      Ok(summary) => {
        update_stage_detail(
          &stage,
          json!({
            "msg": "reconcile completed successfully",
            "summary": summary,
          }),
        )
        .await?;
        self.server = get_pulp_server(&self.server.name).await?;
        Ok(())
      }
      Err(e) => {
        error!("unexpected error in reconcile of repos | {e:#}");
        update_stage_error(
          &stage,
          stage_error("reconcile failed", &format!("{e:#}")),
        )
        .await?;
        Err(e)
      }
    }
  }

  /// Creates the queued child task and task link for every repo in the
  /// selection.
  async fn generate_tasks(
    &self,
    repos: &[PulpServerRepo],
    parent_task_id: &str,
  ) -> anyhow::Result<Vec<Task>> {
    info!("Staging the tasks for {} repo syncs", repos.len());
    let now = pulp_manager_timestamp();
    let mut tasks = Vec::with_capacity(repos.len());
    for repo in repos {
      let task = Task {
        id: String::new(),
        name: format!(
          "{} repo sync {}",
          self.server.name, repo.repo_name
        ),
        parent_task_id: Some(parent_task_id.to_string()),
        task_type: TaskType::RepoSync,
        task_args: json!({
          "pulp_server_repo_id": repo.id,
          "repo_href": repo.repo_href,
        }),
        date_queued: now,
        date_started: None,
        date_finished: None,
        state: TaskState::Queued,
        worker_name: Some(self.worker.name.clone()),
        worker_job_id: self.worker.job_id.clone(),
        error: None,
        date_created: now,
        date_last_updated: now,
      };
      let task = insert_task(task).await?;
      link_repo_task(&repo.id, &task.id).await?;
      tasks.push(task);
    }
    Ok(tasks)
  }

  /// The cooperative scheduler loop. Returns true when the run was
  /// canceled part-way.
  async fn do_sync_repos(
    &self,
    parent_task: &Task,
    repo_tasks: Vec<Task>,
    max_concurrent_syncs: usize,
    sync_options: &Value,
  ) -> anyhow::Result<bool> {
    let parent_stage =
      add_stage(&parent_task.id, "sync repos", None).await?;
    let poll_interval = Duration::from_secs(
      core_config().pulp.poll_interval_sec,
    );

    let total = repo_tasks.len();
    // Children were inserted selection-first; popping from the tail must
    // take the earliest-created task first.
    let mut pending = repo_tasks;
    pending.reverse();
    // task id -> number of polls spent in the backend waiting state
    let mut in_flight: HashMap<String, u32> = HashMap::new();

    while !pending.is_empty() || !in_flight.is_empty() {
      if task_canceled(&parent_task.id).await {
        for task in &pending {
          transition_task(task, TaskState::Canceled).await?;
        }
        return Ok(true);
      }

      debug!(
        "checking/adding tasks repo_tasks_pending: {}, tasks_in_progress: {}",
        pending.len(),
        in_flight.len()
      );

      while !pending.is_empty() && in_flight.len() < max_concurrent_syncs
      {
        let task = pending.pop().unwrap();
        debug!("task {} added to list of tasks in progress", task.name);
        in_flight.insert(task.id.clone(), 0);
      }

      let ids: Vec<String> = in_flight.keys().cloned().collect();
      for id in ids {
        let task = get_task(&id).await?;
        let stages = task_stages(&id).await?;

        if stages.is_empty() {
          debug!("starting sync for task {} id {}", task.name, task.id);
          if let Err(e) = self.start_sync(&task, sync_options).await {
            error!(
              "starting sync for task {} id {} failed | {e:#}",
              task.name, task.id
            );
            in_flight.remove(&id);
          }
          continue;
        }

        let current_stage = stages.last().unwrap();
        let wait_count = in_flight.get_mut(&id).unwrap();
        match self.progress_sync(&task, current_stage, wait_count).await
        {
          Ok(true) => {
            debug!("task {} with id {} finished", task.name, task.id);
            in_flight.remove(&id);
          }
          Ok(false) => {
            touch_task(&task.id).await?;
          }
          Err(e) => {
            error!(
              "progressing sync on task {} with id {} failed | {e:#}",
              task.name, task.id
            );
            in_flight.remove(&id);
          }
        }
      }

      let completed = total - pending.len() - in_flight.len();
      self
        .update_overall_sync_status(
          &parent_stage,
          in_flight.len(),
          completed,
          total,
        )
        .await?;

      if in_flight.len() < max_concurrent_syncs && !pending.is_empty() {
        continue;
      }
      if pending.is_empty() && in_flight.is_empty() {
        break;
      }
      tokio::time::sleep(poll_interval).await;
    }

    self
      .update_overall_sync_status(&parent_stage, 0, total, total)
      .await?;
    Ok(false)
  }

  async fn update_overall_sync_status(
    &self,
    parent_stage: &pulp_manager_client::entities::task::TaskStage,
    in_progress: usize,
    completed: usize,
    total: usize,
  ) -> anyhow::Result<()> {
    update_stage_detail(
      parent_stage,
      stage_detail(format!(
        "{in_progress} syncs in progress. {completed}/{total} syncs \
         completed"
      )),
    )
    .await
  }

  /// Kicks off the backend sync for one child and moves it to running.
  async fn start_sync(
    &self,
    task: &Task,
    sync_options: &Value,
  ) -> anyhow::Result<()> {
    let repo_href = task.task_args["repo_href"]
      .as_str()
      .context("task is missing repo_href")?
      .to_string();
    let stage = add_stage(&task.id, SYNC_STAGE_NAME, None).await?;

    let started = async {
      let pulp_repo = get_repo(&self.client, &repo_href).await?;
      let pulp_sync_task =
        sync_repo(&self.client, &pulp_repo, sync_options).await?;
      anyhow::Ok(pulp_sync_task)
    }
    .await;

    match started {
      Ok(pulp_sync_task) => {
        update_stage_detail(
          &stage,
          stage_detail_with_task(
            format!(
              "{SYNC_STAGE_NAME} in state {}",
              pulp_sync_task.state
            ),
            &pulp_sync_task.pulp_href,
          ),
        )
        .await?;
        transition_task(task, TaskState::Running).await?;
        Ok(())
      }
      Err(e) => {
        let message = format!(
          "unexpected error occured starting repo sync for repo \
           {repo_href}"
        );
        error!("{message} | {e:#}");
        update_stage_error(
          &stage,
          stage_error(&message, &format!("{e:#}")),
        )
        .await?;
        transition_task(task, TaskState::FailedToStart).await?;
        Err(e)
      }
    }
  }

  /// Checks whether a publication already exists for the latest version of
  /// the repo.
  async fn publication_exists(
    &self,
    repo_href: &str,
  ) -> anyhow::Result<bool> {
    let repo = get_repo(&self.client, repo_href).await?;
    let Some(latest) = repo.latest_version_href else {
      return Ok(false);
    };
    let params =
      [(String::from("repository_version"), latest.clone())];
    let publications =
      get_all_publications(&self.client, None, Some(&params)).await?;
    Ok(!publications.is_empty())
  }

  /// Enumerates packages in the latest repo version whose name matches the
  /// banned package regex. DEB uses the backend's server-side regex
  /// filter; other kinds fetch and filter locally.
  async fn find_packages_to_remove(
    &self,
    repo: &Repository,
  ) -> anyhow::Result<Vec<String>> {
    let banned_regex = &core_config().pulp.banned_package_regex;
    if banned_regex.is_empty() {
      return Ok(Vec::new());
    }
    let Some(latest) = &repo.latest_version_href else {
      return Ok(Vec::new());
    };

    debug!("getting latest repo version for {}", repo.name);
    let version = get_repo_version(&self.client, latest).await?;
    let kind = RepoKind::from_href(&repo.pulp_href)?;
    let package_key = format!("{kind}.package");
    let Some(content_href) = version.content_summary["present"]
      [&package_key]["href"]
      .as_str()
    else {
      return Ok(Vec::new());
    };

    let mut packages_to_remove = Vec::new();
    if kind == RepoKind::Deb {
      let params = [
        (String::from("repository_version"), latest.clone()),
        (String::from("package__iregex"), banned_regex.clone()),
      ];
      let results =
        get_content_by_href(&self.client, content_href, &params).await?;
      packages_to_remove.extend(
        results
          .iter()
          .filter_map(|package| package["pulp_href"].as_str())
          .map(str::to_string),
      );
    } else {
      let banned = regex::Regex::new(banned_regex)
        .context("invalid banned_package_regex")?;
      let params =
        [(String::from("repository_version"), latest.clone())];
      let results =
        get_content_by_href(&self.client, content_href, &params).await?;
      for package in results {
        let Some(name) = package["name"].as_str() else {
          continue;
        };
        if banned.is_match(name) {
          debug!("package {name} matches {banned_regex}");
          if let Some(href) = package["pulp_href"].as_str() {
            packages_to_remove.push(href.to_string());
          }
        }
      }
    }

    debug!("{} to remove from {}", packages_to_remove.len(), repo.name);
    Ok(packages_to_remove)
  }

  /// Starts the banned-package removal stage. Returns true when a backend
  /// modify task was started, false when the stage was skipped (internal
  /// feed, or nothing to remove).
  async fn start_remove_banned_packages(
    &self,
    task: &Task,
  ) -> anyhow::Result<bool> {
    let repo_href = task.task_args["repo_href"]
      .as_str()
      .context("task is missing repo_href")?;
    debug!(
      "checking if packages need to be removed from repo with href \
       {repo_href}"
    );

    let result = async {
      let pulp_repo = get_repo(&self.client, repo_href).await?;
      let remote_href = pulp_repo
        .remote
        .clone()
        .context("repo has no remote to check the feed of")?;
      let pulp_remote = get_remote(&self.client, &remote_href).await?;

      for internal_domain in
        core_config().pulp.internal_domain_list()
      {
        if pulp_remote.url.contains(internal_domain) {
          let message = format!(
            "stage skipped for {} as url is in internal domain",
            pulp_repo.name
          );
          debug!("{message}");
          add_stage(
            &task.id,
            REMOVE_BANNED_PACKAGES_STAGE_NAME,
            Some(stage_detail(message)),
          )
          .await?;
          return anyhow::Ok(false);
        }
      }

      let stage = add_stage(
        &task.id,
        REMOVE_BANNED_PACKAGES_STAGE_NAME,
        Some(stage_detail(
          "check if any banned packages need to be removed",
        )),
      )
      .await?;

      let packages_to_remove =
        self.find_packages_to_remove(&pulp_repo).await?;
      if packages_to_remove.is_empty() {
        update_stage_detail(
          &stage,
          stage_detail("stage skipped no packages to remove"),
        )
        .await?;
        return Ok(false);
      }

      let base_version = pulp_repo
        .latest_version_href
        .clone()
        .context("repo has no latest version")?;
      let pulp_task = pulp3_client::repositories::modify_repo(
        &self.client,
        &pulp_repo,
        &base_version,
        None,
        Some(&packages_to_remove),
      )
      .await?;
      update_stage_detail(
        &stage,
        stage_detail_with_task(
          format!("removing {}", packages_to_remove.len()),
          &pulp_task.pulp_href,
        ),
      )
      .await?;
      Ok(true)
    }
    .await;

    if let Err(e) = &result {
      let message = "error occured trying to remove banned packages";
      error!("{message} | {e:#}");
      add_stage(
        &task.id,
        REMOVE_BANNED_PACKAGES_STAGE_NAME,
        Some(stage_error(message, &format!("{e:#}"))),
      )
      .await?;
      fail_task_if_active(&task.id, message, &format!("{e:#}")).await?;
    }
    result
  }

  /// Starts the publication of the repo for one child task.
  async fn start_publication(&self, task: &Task) -> anyhow::Result<()> {
    let repo_href = task.task_args["repo_href"]
      .as_str()
      .context("task is missing repo_href")?;
    debug!("starting publication of repo with href {repo_href}");

    let result = async {
      let pulp_repo = get_repo(&self.client, repo_href).await?;
      let kind = RepoKind::from_href(repo_href)?;

      let mut is_flat_repo = false;
      if kind == RepoKind::Deb
        && let Some(remote_href) = &pulp_repo.remote
      {
        let pulp_remote =
          get_remote(&self.client, remote_href).await?;
        is_flat_repo = pulp_remote.is_flat_repo();
      }

      let latest = pulp_repo
        .latest_version_href
        .clone()
        .context("repo has no latest version to publish")?;
      let publication_task = create_publication_from_repo_version(
        &self.client,
        &latest,
        kind,
        is_flat_repo,
      )
      .await?;

      add_stage(
        &task.id,
        PUBLISH_STAGE_NAME,
        Some(stage_detail_with_task(
          format!("task in state {}", publication_task.state),
          &publication_task.pulp_href,
        )),
      )
      .await?;
      debug!(
        "successfully started publication of {} with href {}",
        pulp_repo.name, publication_task.pulp_href
      );
      anyhow::Ok(())
    }
    .await;

    if let Err(e) = &result {
      let message =
        format!("failed to start publication for repo {repo_href}");
      error!("{message} | {e:#}");
      add_stage(
        &task.id,
        PUBLISH_STAGE_NAME,
        Some(stage_error(&message, &format!("{e:#}"))),
      )
      .await?;
      fail_task_if_active(&task.id, &message, &format!("{e:#}"))
        .await?;
    }
    result
  }

  /// Polls the backend task of the child's current stage and advances the
  /// stage machine. Returns true when the child reached a terminal state.
  async fn progress_sync(
    &self,
    task: &Task,
    current_stage: &pulp_manager_client::entities::task::TaskStage,
    wait_count: &mut u32,
  ) -> anyhow::Result<bool> {
    let detail = current_stage.detail.clone().unwrap_or(json!({}));
    let Some(task_href) =
      detail["task_href"].as_str().map(str::to_string)
    else {
      // A stage without a backend task only happens when starting the
      // stage failed; the error was recorded there.
      return Ok(true);
    };
    let task_href = task_href.as_str();

    let pulp_task = match get_pulp_task(&self.client, task_href).await {
      Ok(pulp_task) => pulp_task,
      Err(e) => {
        let message =
          format!("unexpected error retrieving task {task_href}");
        error!("{message} | {e:#}");
        update_stage_error(
          current_stage,
          stage_error(&message, &format!("{e:#}")),
        )
        .await?;
        fail_task_if_active(&task.id, &message, &format!("{e:#}"))
          .await?;
        return Ok(true);
      }
    };

    if !pulp_task.is_finished() {
      if pulp_task.state == "waiting" {
        *wait_count += 1;
        if *wait_count >= core_config().pulp.max_wait_count {
          let message = format!(
            "task {task_href} failed to enter running state"
          );
          error!("{message}");
          update_stage_error(
            current_stage,
            stage_error("failed to enter running state", &message),
          )
          .await?;
          fail_task_if_active(&task.id, &message, "stuck waiting")
            .await?;
          return Ok(true);
        }
      }
      return Ok(false);
    }

    let mut detail = detail;
    detail["msg"] =
      json!(format!("{} {}. ", current_stage.name, pulp_task.state));
    update_stage_detail(current_stage, detail.clone()).await?;

    if !pulp_task.completed() {
      fail_task_if_active(
        &task.id,
        &format!("{} {}", current_stage.name, pulp_task.state),
        task_href,
      )
      .await?;
      return Ok(true);
    }

    match current_stage.name.as_str() {
      SYNC_STAGE_NAME => {
        let message = if pulp_task.created_resources.is_empty() {
          String::from("no new packages were synched ")
        } else {
          format!(
            "created resources: {}",
            pulp_task.created_resources.join(", ")
          )
        };
        detail["msg"] = json!(message);
        update_stage_detail(current_stage, detail.clone()).await?;

        let repo_href = task.task_args["repo_href"]
          .as_str()
          .context("task is missing repo_href")?;
        let is_container = repo_href.contains("/container/");
        if !self.publication_exists(repo_href).await?
          && !is_container
        {
          let started_package_removal =
            self.start_remove_banned_packages(task).await?;
          if !started_package_removal {
            self.start_publication(task).await?;
          }
          Ok(false)
        } else {
          detail["msg"] = json!(format!(
            "{message} - no new publication required, one exists for \
             the current repo version, or repo is of type container"
          ));
          update_stage_detail(current_stage, detail).await?;
          transition_task(task, TaskState::Completed).await?;
          Ok(true)
        }
      }
      REMOVE_BANNED_PACKAGES_STAGE_NAME => {
        detail["msg"] = json!("banned packages removed successfully");
        update_stage_detail(current_stage, detail).await?;
        self.start_publication(task).await?;
        Ok(false)
      }
      // The publish stage finished and everything is complete.
      _ => {
        transition_task(task, TaskState::Completed).await?;
        Ok(true)
      }
    }
  }

  /// Computes per-repo health from the last five linked tasks.
  async fn calculate_repo_health(
    &self,
    task: &Task,
    repos: &[PulpServerRepo],
  ) -> anyhow::Result<()> {
    info!("calculating repo health for {}", self.server.name);
    let health_stage = add_stage(
      &task.id,
      "calculate repo health",
      Some(stage_detail(format!("0/{} complete", repos.len()))),
    )
    .await?;

    let result = async {
      for (count, repo) in repos.iter().enumerate() {
        let states = linked_task_states(&repo.id, 5).await?;
        let health = classify_health(&states);
        update_one_by_id(
          &db_client().pulp_server_repos,
          &repo.id,
          Update::Set(doc! {
            "repo_sync_health": health.value(),
            "repo_sync_health_date": pulp_manager_timestamp(),
            "date_last_updated": pulp_manager_timestamp(),
          }),
          None,
        )
        .await
        .context("failed to update repo health")?;
        update_stage_detail(
          &health_stage,
          stage_detail(format!(
            "{}/{} complete",
            count + 1,
            repos.len()
          )),
        )
        .await?;
      }
      anyhow::Ok(())
    }
    .await;

    if let Err(e) = &result {
      let message =
        "calculating repo health resulted in an unexpected error";
      error!("{message} | {e:#}");
      update_stage_error(
        &health_stage,
        stage_error(message, &format!("{e:#}")),
      )
      .await?;
    }
    result
  }

  /// Rolls per-repo health up to the backend: red wins over amber wins
  /// over green.
  async fn calculate_health_rollup(
    &mut self,
    task: &Task,
  ) -> anyhow::Result<()> {
    info!(
      "calculating pulp server repo health rollup for {}",
      self.server.name
    );
    let health_stage = add_stage(
      &task.id,
      "calculate pulp server repo health roll up",
      None,
    )
    .await?;

    let result = async {
      let repos = get_server_repos(&self.server).await?;
      let healths: Vec<Option<RepoHealthStatus>> =
        repos.iter().map(|repo| repo.repo_sync_health).collect();
      let rollup = rollup_health(&healths);
      update_one_by_id(
        &db_client().pulp_servers,
        &self.server.id,
        Update::Set(doc! {
          "repo_sync_health_rollup": rollup.value(),
          "repo_sync_health_rollup_date": pulp_manager_timestamp(),
          "date_last_updated": pulp_manager_timestamp(),
        }),
        None,
      )
      .await
      .context("failed to update health rollup")?;
      anyhow::Ok(())
    }
    .await;

    if let Err(e) = &result {
      let message =
        "calculating pulp server repo sync health rollup unexpected \
         error";
      error!("{message} | {e:#}");
      update_stage_error(
        &health_stage,
        stage_error(message, &format!("{e:#}")),
      )
      .await?;
    }
    result
  }
}

/// Job entry point used by the worker and the cron schedules.
#[allow(clippy::too_many_arguments)]
pub async fn sync_repos(
  pulp_server: &str,
  max_concurrent_syncs: u16,
  regex_include: Option<&str>,
  regex_exclude: Option<&str>,
  source_pulp_server_name: Option<&str>,
  sync_options: Option<Value>,
  task_id: Option<&str>,
  worker: WorkerIdentity,
) -> anyhow::Result<()> {
  let mut syncher = RepoSyncher::new(pulp_server, worker).await?;
  syncher
    .sync_repos(
      max_concurrent_syncs,
      regex_include,
      regex_exclude,
      source_pulp_server_name,
      sync_options,
      task_id,
    )
    .await
}
