use pulp_manager_client::entities::repo::RepoKind;
use serde_json::json;

use crate::{
  Pulp3Client, Pulp3Error, Result, decode,
  resources::{Distribution, PulpTask},
  task_href, tasks,
};

pub const BASE_URL: &str = "/distributions/";

pub fn distribution_url(kind: RepoKind) -> &'static str {
  match kind {
    RepoKind::File => "/distributions/file/file/",
    RepoKind::Rpm => "/distributions/rpm/rpm/",
    RepoKind::Deb => "/distributions/deb/apt/",
    RepoKind::Python => "/distributions/python/pypi/",
    RepoKind::Container => "/distributions/container/container/",
  }
}

fn validate_href(href: &str) -> Result<()> {
  if !href.contains(BASE_URL) {
    return Err(Pulp3Error::InvalidHref {
      expected: "distribution",
      href: href.to_string(),
    });
  }
  Ok(())
}

pub async fn get_all_distributions(
  client: &Pulp3Client,
  kind: Option<RepoKind>,
  params: Option<&[(String, String)]>,
) -> Result<Vec<Distribution>> {
  let url = kind.map(distribution_url).unwrap_or(BASE_URL);
  let results = client.get_page_results(url, params).await?;
  results
    .into_iter()
    .map(|value| decode(url, value))
    .collect()
}

/// Creates a distribution serving `repository` at `base_path`. Distribution
/// writes are asynchronous on the backend.
pub async fn new_distribution(
  client: &Pulp3Client,
  kind: RepoKind,
  name: &str,
  base_path: &str,
  repository: &str,
) -> Result<PulpTask> {
  let url = distribution_url(kind);
  let body = json!({
    "name": name,
    "base_path": base_path,
    "repository": repository,
  });
  let value = client.post(url, &body).await?;
  let task = task_href(url, &value)?;
  tasks::get_task(client, &task).await
}

pub async fn delete_distribution(
  client: &Pulp3Client,
  distribution: &Distribution,
) -> Result<PulpTask> {
  validate_href(&distribution.pulp_href)?;
  let value = client.delete(&distribution.pulp_href).await?;
  let task = task_href(&distribution.pulp_href, &value)?;
  tasks::get_task(client, &task).await
}
