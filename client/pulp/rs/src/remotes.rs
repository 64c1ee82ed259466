use pulp_manager_client::entities::repo::RepoKind;
use serde_json::{Value, json};

use crate::{
  Pulp3Client, Pulp3Error, Result, decode,
  resources::{PulpTask, Remote},
  task_href, tasks,
};

pub const BASE_URL: &str = "/remotes/";

pub fn remote_url(kind: RepoKind) -> &'static str {
  match kind {
    RepoKind::File => "/remotes/file/file/",
    RepoKind::Rpm => "/remotes/rpm/rpm/",
    RepoKind::Deb => "/remotes/deb/apt/",
    RepoKind::Python => "/remotes/python/python/",
    RepoKind::Container => "/remotes/container/container/",
  }
}

fn validate_href(href: &str) -> Result<()> {
  if !href.contains(BASE_URL) {
    return Err(Pulp3Error::InvalidHref {
      expected: "remote",
      href: href.to_string(),
    });
  }
  Ok(())
}

pub async fn get_all_remotes(
  client: &Pulp3Client,
  kind: Option<RepoKind>,
  params: Option<&[(String, String)]>,
) -> Result<Vec<Remote>> {
  let url = kind.map(remote_url).unwrap_or(BASE_URL);
  let results = client.get_page_results(url, params).await?;
  results
    .into_iter()
    .map(|value| decode(url, value))
    .collect()
}

pub async fn get_remote(
  client: &Pulp3Client,
  href: &str,
) -> Result<Remote> {
  validate_href(href)?;
  let value = client.get(href, None).await?;
  decode(href, value)
}

/// Creates a remote pointed at `feed`. Extra plugin fields go through
/// `options`.
pub async fn new_remote(
  client: &Pulp3Client,
  kind: RepoKind,
  name: &str,
  feed: &str,
  options: Option<&Value>,
) -> Result<Remote> {
  let url = remote_url(kind);
  let mut body = json!({ "name": name, "url": feed, "policy": "immediate" });
  if let (Some(body), Some(options)) =
    (body.as_object_mut(), options.and_then(Value::as_object))
  {
    for (key, value) in options {
      body.insert(key.clone(), value.clone());
    }
  }
  let value = client.post(url, &body).await?;
  decode(url, value)
}

pub async fn delete_remote(
  client: &Pulp3Client,
  remote: &Remote,
) -> Result<PulpTask> {
  validate_href(&remote.pulp_href)?;
  let value = client.delete(&remote.pulp_href).await?;
  let task = task_href(&remote.pulp_href, &value)?;
  tasks::get_task(client, &task).await
}
