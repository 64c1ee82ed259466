use pulp_manager_client::entities::repo::RepoKind;

use crate::{
  Pulp3Client, Pulp3Error, Result, decode,
  resources::{NewPublication, Publication, PulpTask},
  task_href, tasks,
};

pub const BASE_URL: &str = "/publications/";

/// Container repositories are served straight from the repository and have
/// no publication endpoint.
pub fn publication_url(kind: RepoKind) -> Result<&'static str> {
  match kind {
    RepoKind::File => Ok("/publications/file/file/"),
    RepoKind::Rpm => Ok("/publications/rpm/rpm/"),
    RepoKind::Deb => Ok("/publications/deb/apt/"),
    RepoKind::Python => Ok("/publications/python/pypi/"),
    RepoKind::Container => Err(Pulp3Error::InvalidRequest(
      "container repositories do not have publications".to_string(),
    )),
  }
}

pub async fn get_all_publications(
  client: &Pulp3Client,
  kind: Option<RepoKind>,
  params: Option<&[(String, String)]>,
) -> Result<Vec<Publication>> {
  let url = match kind {
    Some(kind) => publication_url(kind)?,
    None => BASE_URL,
  };
  let results = client.get_page_results(url, params).await?;
  results
    .into_iter()
    .map(|value| decode(url, value))
    .collect()
}

/// Creates a publication; the backend materialises it asynchronously.
pub async fn new_publication(
  client: &Pulp3Client,
  publication: &NewPublication,
) -> Result<PulpTask> {
  let url = publication_url(publication.kind)?;
  let body = publication.body()?;
  let value = client.post(url, &body).await?;
  let task = task_href(url, &value)?;
  tasks::get_task(client, &task).await
}
