use anyhow::Context;
use mungos::{
  find::find_collect,
  mongodb::{Collection, bson::Document},
};
use pulp_manager_client::api::Page;
use serde::de::DeserializeOwned;

use crate::filter::page_options;

/// Runs one page of a filtered query and returns it with the total match
/// count. `page` is 1-based; `page_size` above the configured maximum is
/// rejected before any query runs.
pub async fn filter_paged_result<T>(
  collection: &Collection<T>,
  filter: Document,
  sort: Option<Document>,
  page: u64,
  page_size: u64,
  max_page_size: u64,
) -> anyhow::Result<Page<T>>
where
  T: DeserializeOwned + Unpin + Send + Sync,
{
  let options = page_options(sort, page, page_size, max_page_size)
    .map_err(anyhow::Error::new)?;

  let total = collection
    .count_documents(filter.clone())
    .await
    .context("failed to count filtered documents")?;

  let items = find_collect(collection, filter, options)
    .await
    .context("failed to run filtered query")?;

  Ok(Page {
    items,
    total,
    page: page.max(1),
    page_size,
  })
}
