use std::{sync::Arc, time::Duration};

use anyhow::Context;
use database::mungos::{find::find_collect, mongodb::bson::doc};
use pulp3_client::{
  CredentialProvider, Pulp3Client, StaticCredentials,
  distributions::{get_all_distributions, new_distribution},
  publications::new_publication,
  repositories::{get_all_repos, new_repo},
  resources::{NewPublication, PulpTask, Repository},
  tasks::monitor_task,
};
use pulp_manager_client::entities::{
  repo::{RepoHealthStatus, RepoKind},
  server::{PulpServer, PulpServerRepo},
  task::TaskState,
};
use vault_client::HashiVaultClient;

use crate::{
  config::core_config, errors::PulpManagerError, state::db_client,
};

pub mod task;

/// Identity stamped onto tasks a worker claims.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
  pub name: String,
  pub job_id: Option<String>,
}

/// Credential provider backed by the vault agent; re-read on every refresh
/// so rotated passwords are picked up after an unauthorized response.
struct VaultCredentials {
  vault: HashiVaultClient,
  mount: String,
}

#[async_trait::async_trait]
impl CredentialProvider for VaultCredentials {
  async fn password(&self, username: &str) -> anyhow::Result<String> {
    self
      .vault
      .get_svc_account_password(username, &self.mount)
      .await
      .map_err(anyhow::Error::new)
  }
}

/// Builds the API client for a backend. Local mode uses the static
/// password from config over plain http; everything else authenticates
/// with vault-held credentials over https.
pub fn new_pulp_client(server: &PulpServer) -> Pulp3Client {
  let config = core_config();
  if config.is_local {
    return Pulp3Client::new(
      &server.name,
      &server.username,
      Arc::new(StaticCredentials(config.pulp.password.clone())),
      false,
    );
  }
  let mount = server
    .vault_service_account_mount
    .clone()
    .unwrap_or_else(|| String::from("service-accounts"));
  Pulp3Client::new(
    &server.name,
    &server.username,
    Arc::new(VaultCredentials {
      vault: HashiVaultClient::new(config.vault.vault_addr.clone()),
      mount,
    }),
    true,
  )
}

pub async fn get_pulp_server(name: &str) -> anyhow::Result<PulpServer> {
  db_client()
    .pulp_servers
    .find_one(doc! { "name": name })
    .await
    .context("failed to query pulp servers")?
    .ok_or_else(|| {
      PulpManagerError::EntityNotFound(format!(
        "pulp server with name {name} not found"
      ))
      .into()
    })
}

pub async fn get_server_repos(
  server: &PulpServer,
) -> anyhow::Result<Vec<PulpServerRepo>> {
  find_collect(
    &db_client().pulp_server_repos,
    doc! { "pulp_server_id": &server.id },
    None,
  )
  .await
  .context("failed to query pulp server repos")
}

/// Applies the selection regexes to a backend's repos. Exclude wins over
/// include; repos without an upstream feed are dropped unless the caller
/// opts out (bulk removal selects feedless repos too). Regexes use search
/// semantics, matching anywhere in the repo name.
pub fn select_repos(
  repos: &[PulpServerRepo],
  regex_include: Option<&str>,
  regex_exclude: Option<&str>,
  exclude_no_remote: bool,
) -> anyhow::Result<Vec<PulpServerRepo>> {
  let include = regex_include
    .map(regex::Regex::new)
    .transpose()
    .context("invalid regex_include")?;
  let exclude = regex_exclude
    .map(regex::Regex::new)
    .transpose()
    .context("invalid regex_exclude")?;

  let mut matching = Vec::new();
  for repo in repos {
    if exclude_no_remote && repo.remote_feed.is_none() {
      continue;
    }
    if let Some(exclude) = &exclude
      && exclude.is_match(&repo.repo_name)
    {
      continue;
    }
    if let Some(include) = &include
      && !include.is_match(&repo.repo_name)
    {
      continue;
    }
    matching.push(repo.clone());
  }
  Ok(matching)
}

/// Health of one repo from its most recent task outcomes (newest first,
/// at most five): green when the latest run completed, amber when at most
/// three of them failed but something succeeded, red otherwise.
pub fn classify_health(states: &[TaskState]) -> RepoHealthStatus {
  let Some(latest) = states.first() else {
    return RepoHealthStatus::Red;
  };
  if *latest == TaskState::Completed {
    return RepoHealthStatus::Green;
  }
  let num_success = states
    .iter()
    .filter(|state| **state == TaskState::Completed)
    .count();
  let num_fail = states.len() - num_success;
  if num_fail <= 3 && num_success > 0 {
    RepoHealthStatus::Amber
  } else {
    RepoHealthStatus::Red
  }
}

/// Backend rollup over per-repo health. A repo that has never been
/// health-checked counts as red.
pub fn rollup_health(
  repo_healths: &[Option<RepoHealthStatus>],
) -> RepoHealthStatus {
  let mut amber = false;
  for health in repo_healths {
    match health {
      Some(RepoHealthStatus::Green) => {}
      Some(RepoHealthStatus::Amber) => amber = true,
      _ => return RepoHealthStatus::Red,
    }
  }
  if amber {
    RepoHealthStatus::Amber
  } else {
    RepoHealthStatus::Green
  }
}

/// Parses duration literals of the shape `90`, `90s`, `15m`, `4h`, `1d`.
pub fn parse_duration(literal: &str) -> anyhow::Result<Duration> {
  let literal = literal.trim();
  let (number, unit) = match literal
    .find(|c: char| !c.is_ascii_digit())
  {
    Some(index) => literal.split_at(index),
    None => (literal, "s"),
  };
  let number: u64 = number
    .parse()
    .with_context(|| format!("invalid duration literal '{literal}'"))?;
  let seconds = match unit {
    "s" | "sec" | "secs" => number,
    "m" | "min" | "mins" => number * 60,
    "h" | "hr" | "hrs" => number * 3600,
    "d" | "day" | "days" => number * 86_400,
    _ => {
      anyhow::bail!("invalid duration literal '{literal}'")
    }
  };
  Ok(Duration::from_secs(seconds))
}

/// Deletes a backend artifact by href and drives the resulting task to
/// completion.
pub async fn delete_by_href_monitor(
  client: &Pulp3Client,
  href: &str,
  poll_interval_sec: u64,
  max_wait_count: u32,
) -> anyhow::Result<PulpTask> {
  let result = client.delete(href).await?;
  let task = result
    .get("task")
    .and_then(|task| task.as_str())
    .with_context(|| {
      format!("delete of {href} did not return a task href")
    })?;
  let task =
    monitor_task(client, task, poll_interval_sec, max_wait_count, true)
      .await?;
  Ok(task)
}

/// Creates a publication for a repository version with the fleet's
/// publisher defaults.
pub async fn create_publication_from_repo_version(
  client: &Pulp3Client,
  version_href: &str,
  kind: RepoKind,
  flat_deb_repo: bool,
) -> anyhow::Result<PulpTask> {
  let publication =
    NewPublication::for_version(kind, version_href, flat_deb_repo);
  new_publication(client, &publication)
    .await
    .context("failed to start publication")
}

/// Finds a backend repository by name, creating it when missing.
pub async fn ensure_backend_repository(
  client: &Pulp3Client,
  kind: RepoKind,
  name: &str,
  description: Option<&str>,
) -> anyhow::Result<Repository> {
  let params = [(String::from("name"), name.to_string())];
  let mut existing =
    get_all_repos(client, Some(kind), Some(&params)).await?;
  if let Some(repository) = existing.pop() {
    return Ok(repository);
  }
  new_repo(client, kind, name, description)
    .await
    .with_context(|| format!("failed to create repository {name}"))
}

/// Makes sure a distribution with the repo's name exists, serving the
/// repository at a base path equal to its name.
pub async fn ensure_backend_distribution(
  client: &Pulp3Client,
  kind: RepoKind,
  repository: &Repository,
) -> anyhow::Result<()> {
  let params = [(String::from("name"), repository.name.clone())];
  let existing =
    get_all_distributions(client, Some(kind), Some(&params)).await?;
  if !existing.is_empty() {
    return Ok(());
  }
  let config = core_config();
  let task = new_distribution(
    client,
    kind,
    &repository.name,
    &repository.name,
    &repository.pulp_href,
  )
  .await?;
  monitor_task(
    client,
    &task.pulp_href,
    config.pulp.poll_interval_sec,
    config.pulp.max_wait_count,
    true,
  )
  .await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use pulp_manager_client::entities::pulp_manager_timestamp;

  use super::*;

  fn repo(name: &str, feed: Option<&str>) -> PulpServerRepo {
    let now = pulp_manager_timestamp();
    PulpServerRepo {
      id: String::from("aaaaaaaaaaaaaaaaaaaaaaaa"),
      pulp_server_id: String::from("bbbbbbbbbbbbbbbbbbbbbbbb"),
      repo_id: String::from("cccccccccccccccccccccccc"),
      pulp_server_name: String::from("pulp01.example.com"),
      repo_name: name.to_string(),
      repo_type: RepoKind::Rpm,
      repo_href: format!("/pulp/api/v3/repositories/rpm/rpm/{name}/"),
      remote_href: None,
      remote_feed: feed.map(str::to_string),
      distribution_href: None,
      repo_sync_health: None,
      repo_sync_health_date: None,
      date_created: now,
      date_last_updated: now,
    }
  }

  #[test]
  fn selection_exclude_wins() {
    let repos = vec![
      repo("ext-foo", Some("https://upstream/foo")),
      repo("ext-bar", Some("https://upstream/bar")),
      repo("internal-baz", Some("https://internal/baz")),
    ];
    let selected =
      select_repos(&repos, Some("^ext-"), Some("bar"), true).unwrap();
    let names = selected
      .iter()
      .map(|repo| repo.repo_name.as_str())
      .collect::<Vec<_>>();
    assert_eq!(names, vec!["ext-foo"]);
  }

  #[test]
  fn selection_skips_feedless_repos_unless_asked() {
    let repos =
      vec![repo("ext-foo", None), repo("ext-bar", Some("https://u/b"))];
    let selected =
      select_repos(&repos, Some("^ext-"), None, true).unwrap();
    assert_eq!(selected.len(), 1);
    let selected =
      select_repos(&repos, Some("^ext-"), None, false).unwrap();
    assert_eq!(selected.len(), 2);
  }

  #[test]
  fn selection_rejects_bad_regex() {
    assert!(select_repos(&[], Some("("), None, true).is_err());
  }

  #[test]
  fn health_classification() {
    use TaskState::*;
    assert_eq!(
      classify_health(&[Completed, Failed, Failed]),
      RepoHealthStatus::Green
    );
    assert_eq!(
      classify_health(&[Failed, Completed, Failed, Failed, Completed]),
      RepoHealthStatus::Amber
    );
    assert_eq!(
      classify_health(&[Failed, Failed, Failed, Failed, Completed]),
      RepoHealthStatus::Red
    );
    assert_eq!(classify_health(&[Failed]), RepoHealthStatus::Red);
    assert_eq!(classify_health(&[]), RepoHealthStatus::Red);
  }

  #[test]
  fn health_rollup() {
    use RepoHealthStatus::*;
    assert_eq!(rollup_health(&[Some(Green), Some(Green)]), Green);
    assert_eq!(rollup_health(&[Some(Green), Some(Amber)]), Amber);
    assert_eq!(
      rollup_health(&[Some(Amber), Some(Red), Some(Green)]),
      Red
    );
    assert_eq!(rollup_health(&[Some(Green), None]), Red);
    assert_eq!(rollup_health(&[]), Green);
  }

  #[test]
  fn duration_literals() {
    assert_eq!(parse_duration("90").unwrap().as_secs(), 90);
    assert_eq!(parse_duration("90s").unwrap().as_secs(), 90);
    assert_eq!(parse_duration("15m").unwrap().as_secs(), 900);
    assert_eq!(parse_duration("4h").unwrap().as_secs(), 14_400);
    assert_eq!(parse_duration("1d").unwrap().as_secs(), 86_400);
    assert!(parse_duration("4 fortnights").is_err());
    assert!(parse_duration("").is_err());
  }
}
