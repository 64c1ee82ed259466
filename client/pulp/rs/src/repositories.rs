//! Repository operations. Each repo kind has its own URL family under
//! `/repositories/<kind>/<plugin>/`.

use pulp_manager_client::entities::repo::RepoKind;
use serde_json::{Value, json};

use crate::{
  Pulp3Client, Pulp3Error, Result, decode,
  resources::{PulpTask, Repository, RepositoryVersion},
  task_href, tasks,
};

pub const BASE_URL: &str = "/repositories/";

pub fn repository_url(kind: RepoKind) -> &'static str {
  match kind {
    RepoKind::File => "/repositories/file/file/",
    RepoKind::Rpm => "/repositories/rpm/rpm/",
    RepoKind::Deb => "/repositories/deb/apt/",
    RepoKind::Python => "/repositories/python/python/",
    RepoKind::Container => "/repositories/container/container/",
  }
}

fn validate_href(href: &str) -> Result<()> {
  if !href.contains(BASE_URL) {
    return Err(Pulp3Error::InvalidHref {
      expected: "repository",
      href: href.to_string(),
    });
  }
  Ok(())
}

/// Lists repositories, optionally narrowed to one kind.
pub async fn get_all_repos(
  client: &Pulp3Client,
  kind: Option<RepoKind>,
  params: Option<&[(String, String)]>,
) -> Result<Vec<Repository>> {
  let url = kind.map(repository_url).unwrap_or(BASE_URL);
  let results = client.get_page_results(url, params).await?;
  results
    .into_iter()
    .map(|value| decode(url, value))
    .collect()
}

pub async fn get_repo(
  client: &Pulp3Client,
  href: &str,
) -> Result<Repository> {
  validate_href(href)?;
  let value = client.get(href, None).await?;
  decode(href, value)
}

/// Creates a repository; unlike most mutations this returns the object
/// directly rather than a task.
pub async fn new_repo(
  client: &Pulp3Client,
  kind: RepoKind,
  name: &str,
  description: Option<&str>,
) -> Result<Repository> {
  let url = repository_url(kind);
  let mut body = json!({ "name": name });
  if let Some(description) = description {
    body["description"] = Value::String(description.to_string());
  }
  let value = client.post(url, &body).await?;
  decode(url, value)
}

pub async fn delete_repo(
  client: &Pulp3Client,
  repo: &Repository,
) -> Result<PulpTask> {
  validate_href(&repo.pulp_href)?;
  let value = client.delete(&repo.pulp_href).await?;
  let task = task_href(&repo.pulp_href, &value)?;
  tasks::get_task(client, &task).await
}

pub async fn get_repo_version(
  client: &Pulp3Client,
  href: &str,
) -> Result<RepositoryVersion> {
  validate_href(href)?;
  let value = client.get(href, None).await?;
  decode(href, value)
}

/// Kicks off a sync. `body` carries the repo-type specific sync options and
/// may be empty.
pub async fn sync_repo(
  client: &Pulp3Client,
  repo: &Repository,
  body: &Value,
) -> Result<PulpTask> {
  validate_href(&repo.pulp_href)?;
  let url = format!("{}sync/", repo.pulp_href);
  let value = client.post(&url, body).await?;
  let task = task_href(&url, &value)?;
  tasks::get_task(client, &task).await
}

/// Creates a new repository version from `base_version` with content units
/// added and/or removed.
pub async fn modify_repo(
  client: &Pulp3Client,
  repo: &Repository,
  base_version: &str,
  add_content_units: Option<&[String]>,
  remove_content_units: Option<&[String]>,
) -> Result<PulpTask> {
  validate_href(&repo.pulp_href)?;
  let url = format!("{}modify/", repo.pulp_href);
  let mut body = json!({ "base_version": base_version });
  if let Some(add) = add_content_units {
    body["add_content_units"] = json!(add);
  }
  if let Some(remove) = remove_content_units {
    body["remove_content_units"] = json!(remove);
  }
  let value = client.post(&url, &body).await?;
  let task = task_href(&url, &value)?;
  tasks::get_task(client, &task).await
}

/// Copies the latest content of `source_repo` into `dest_repo` through the
/// plugin copy endpoint. Only RPM and DEB expose one; DEB copies carry
/// `structured: true` so component structure survives.
pub async fn copy_repo(
  client: &Pulp3Client,
  source_repo: &Repository,
  dest_repo: &Repository,
) -> Result<PulpTask> {
  let kind = RepoKind::from_href(&source_repo.pulp_href)
    .map_err(|_| Pulp3Error::InvalidHref {
      expected: "repository",
      href: source_repo.pulp_href.clone(),
    })?;
  let source_repo_version = source_repo
    .latest_version_href
    .clone()
    .ok_or_else(|| {
      Pulp3Error::InvalidRequest(format!(
        "repository {} has no versions to copy",
        source_repo.name
      ))
    })?;
  let mut body = json!({
    "config": [{
      "source_repo_version": source_repo_version,
      "dest_repo": dest_repo.pulp_href,
    }],
  });
  let url = match kind {
    RepoKind::Rpm => "/rpm/copy/",
    RepoKind::Deb => {
      body["structured"] = Value::Bool(true);
      "/deb/copy/"
    }
    kind => {
      return Err(Pulp3Error::InvalidRequest(format!(
        "copy is not supported for {kind} repositories"
      )));
    }
  };
  let value = client.post(url, &body).await?;
  let task = task_href(url, &value)?;
  tasks::get_task(client, &task).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_per_kind() {
    assert_eq!(repository_url(RepoKind::Deb), "/repositories/deb/apt/");
    assert_eq!(
      repository_url(RepoKind::Python),
      "/repositories/python/python/"
    );
  }

  #[test]
  fn href_validation() {
    assert!(validate_href("/pulp/api/v3/repositories/rpm/rpm/1/").is_ok());
    assert!(validate_href("/pulp/api/v3/remotes/rpm/rpm/1/").is_err());
  }
}
