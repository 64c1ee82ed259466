use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::{Pulp3Client, Pulp3Error, Result, decode, resources::PulpTask};

pub const BASE_URL: &str = "/tasks/";

fn validate_href(href: &str) -> Result<()> {
  if !href.contains("tasks") {
    return Err(Pulp3Error::InvalidHref {
      expected: "task",
      href: href.to_string(),
    });
  }
  Ok(())
}

pub async fn get_all_tasks(
  client: &Pulp3Client,
  params: Option<&[(String, String)]>,
) -> Result<Vec<PulpTask>> {
  let results = client.get_page_results(BASE_URL, params).await?;
  results
    .into_iter()
    .map(|value| decode(BASE_URL, value))
    .collect()
}

pub async fn get_task(
  client: &Pulp3Client,
  href: &str,
) -> Result<PulpTask> {
  validate_href(href)?;
  let value = client.get(href, None).await?;
  decode(href, value)
}

pub async fn cancel_task(
  client: &Pulp3Client,
  href: &str,
) -> Result<PulpTask> {
  validate_href(href)?;
  let value =
    client.patch(href, &json!({ "state": "canceled" })).await?;
  decode(href, value)
}

/// Polls a task to a terminal state. A task that sits in `waiting` for
/// `max_wait_count` polls is treated as stuck and reported as an error
/// without waiting out the budget on `running`.
pub async fn monitor_task(
  client: &Pulp3Client,
  href: &str,
  poll_interval_sec: u64,
  max_wait_count: u32,
  error_on_failure: bool,
) -> Result<PulpTask> {
  validate_href(href)?;
  let mut task = get_task(client, href).await?;
  let mut wait_count = 0;

  while !task.is_finished() {
    if task.state == "waiting" {
      wait_count += 1;
      if wait_count == max_wait_count {
        return Err(Pulp3Error::TaskStuckWaiting {
          href: href.to_string(),
          poll_interval_sec,
          max_wait_count,
        });
      }
    }
    tokio::time::sleep(Duration::from_secs(poll_interval_sec)).await;
    task = get_task(client, href).await?;
    debug!("task {href} in state {}", task.state);
  }

  if task.state == "failed" && error_on_failure {
    let error = task
      .error
      .as_ref()
      .map(|error| error.to_string())
      .unwrap_or_default();
    return Err(Pulp3Error::TaskFailed {
      href: href.to_string(),
      error,
    });
  }

  Ok(task)
}
