//! Content listings. Content schemas are plugin specific, so results stay
//! as raw JSON and callers pick out the fields they filter on
//! (`pulp_href`, `name`, `package`, `version`, `sha256`).

use pulp_manager_client::entities::repo::RepoKind;
use serde_json::Value;

use crate::{Pulp3Client, Result};

pub const BASE_URL: &str = "/content/";

pub fn package_content_url(kind: RepoKind) -> &'static str {
  match kind {
    RepoKind::File => "/content/file/files/",
    RepoKind::Rpm => "/content/rpm/packages/",
    RepoKind::Deb => "/content/deb/packages/",
    RepoKind::Python => "/content/python/packages/",
    RepoKind::Container => "/content/container/manifests/",
  }
}

/// Lists package content units, filtered by the given query params
/// (typically `repository_version` plus type-specific fields).
pub async fn get_package_content(
  client: &Pulp3Client,
  kind: RepoKind,
  params: &[(String, String)],
) -> Result<Vec<Value>> {
  client
    .get_page_results(package_content_url(kind), Some(params))
    .await
}

/// Raw paged listing of an arbitrary content href, for callers following a
/// `content_summary` link.
pub async fn get_content_by_href(
  client: &Pulp3Client,
  href: &str,
  params: &[(String, String)],
) -> Result<Vec<Value>> {
  // content_summary hrefs embed their own query string; strip it so the
  // caller-supplied params are authoritative
  let href = href.split('?').next().unwrap_or(href);
  client.get_page_results(href, Some(params)).await
}
