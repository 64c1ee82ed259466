//! Prometheus metrics for the fleet, refreshed on every scrape from the
//! entity store plus a reachability probe of each backend's status
//! endpoint.

use std::{sync::OnceLock, time::Duration};

use axum::{Router, routing::get};
use database::mungos::{find::find_collect, mongodb::bson::doc};
use futures_util::future::join_all;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use pulp_manager_client::entities::{
  pulp_manager_timestamp, server::PulpServer, task::TaskState,
};

use crate::{config::core_config, state::db_client};

struct Metrics {
  registry: Registry,
  rollup: GaugeVec,
  rollup_last_run: GaugeVec,
  repo_health: GaugeVec,
  repo_health_last_run: GaugeVec,
  tasks_by_state: Vec<(TaskState, GaugeVec)>,
  database_connection: GaugeVec,
  redis_connection: GaugeVec,
}

fn gauge(
  registry: &Registry,
  name: &str,
  help: &str,
  labels: &[&str],
) -> GaugeVec {
  let gauge = GaugeVec::new(Opts::new(name, help), labels)
    .expect("invalid gauge definition");
  registry
    .register(Box::new(gauge.clone()))
    .expect("duplicate gauge registration");
  gauge
}

fn metrics() -> &'static Metrics {
  static METRICS: OnceLock<Metrics> = OnceLock::new();
  METRICS.get_or_init(|| {
    let registry = Registry::new();
    let tasks_by_state = [
      (TaskState::Queued, "queued"),
      (TaskState::Running, "running"),
      (TaskState::Completed, "completed"),
      (TaskState::Failed, "failed"),
      (TaskState::Canceled, "canceled"),
      (TaskState::FailedToStart, "failed_to_start"),
      (TaskState::Skipped, "skipped"),
    ]
    .into_iter()
    .map(|(state, name)| {
      (
        state,
        gauge(
          &registry,
          &format!("pulp_manager_pulp_server_tasks_in_{name}_state"),
          &format!(
            "Pulp Server count of tasks from the last day currently \
             {name}"
          ),
          &["pulp_server_name"],
        ),
      )
    })
    .collect();

    Metrics {
      rollup: gauge(
        &registry,
        "pulp_manager_pulp_server_repo_sync_health_rollup",
        "Pulp Server repo sync health rollup",
        &["pulp_server_name", "repo_sync_health_rollup"],
      ),
      rollup_last_run: gauge(
        &registry,
        "pulp_manager_pulp_server_repo_sync_health_rollup_last_run_seconds",
        "Seconds since the repo sync health rollup was last calculated. \
         -1 means never",
        &["pulp_server_name"],
      ),
      repo_health: gauge(
        &registry,
        "pulp_manager_pulp_server_repo_sync_health",
        "Pulp Server repo sync health for individual repo",
        &["pulp_server_name", "repo_name", "repo_sync_health", "has_remote"],
      ),
      repo_health_last_run: gauge(
        &registry,
        "pulp_manager_pulp_server_repo_sync_health_last_run_seconds",
        "Seconds since the repo sync health check was last run. -1 \
         means never",
        &["pulp_server_name", "repo_name"],
      ),
      tasks_by_state,
      database_connection: gauge(
        &registry,
        "pulp_manager_pulp_server_database_connection",
        "Status of Pulp server database connectivity",
        &["pulp_server_name"],
      ),
      redis_connection: gauge(
        &registry,
        "pulp_manager_pulp_server_redis_connection",
        "Status of Pulp server redis connectivity",
        &["pulp_server_name"],
      ),
      registry,
    }
  })
}

/// Extracts the backend hostname out of a task name so task counts can be
/// grouped per server.
fn task_server_name(task_name: &str) -> Option<&str> {
  static HOSTNAME: OnceLock<regex::Regex> = OnceLock::new();
  let hostname = HOSTNAME.get_or_init(|| {
    regex::Regex::new(r"\b[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b")
      .expect("invalid hostname pattern")
  });
  hostname.find(task_name).map(|found| found.as_str())
}

async fn collect() -> anyhow::Result<()> {
  let metrics = metrics();
  let db = db_client();
  let now = pulp_manager_timestamp();
  let one_day_ago = now - 24 * 3600 * 1000;

  // Dynamic label values go stale between scrapes, start from scratch.
  metrics.rollup.reset();
  metrics.rollup_last_run.reset();
  metrics.repo_health.reset();
  metrics.repo_health_last_run.reset();
  metrics.database_connection.reset();
  metrics.redis_connection.reset();
  for (_, gauge) in &metrics.tasks_by_state {
    gauge.reset();
  }

  let servers = find_collect(&db.pulp_servers, None, None).await?;
  let server_repos =
    find_collect(&db.pulp_server_repos, None, None).await?;
  let tasks = find_collect(
    &db.tasks,
    doc! { "date_created": { "$gte": one_day_ago } },
    None,
  )
  .await?;

  for server in &servers {
    let rollup = server
      .repo_sync_health_rollup
      .map(|health| health.to_string())
      .unwrap_or_else(|| String::from("None"));
    metrics
      .rollup
      .with_label_values(&[&server.name, &rollup])
      .set(1.0);
    let last_run = server
      .repo_sync_health_rollup_date
      .map(|date| ((now - date) / 1000) as f64)
      .unwrap_or(-1.0);
    metrics
      .rollup_last_run
      .with_label_values(&[&server.name])
      .set(last_run);
  }

  for repo in &server_repos {
    let health = repo
      .repo_sync_health
      .map(|health| health.to_string())
      .unwrap_or_else(|| String::from("None"));
    let has_remote = if repo.remote_href.is_some() { "1" } else { "0" };
    metrics
      .repo_health
      .with_label_values(&[
        &repo.pulp_server_name,
        &repo.repo_name,
        &health,
        has_remote,
      ])
      .set(1.0);
    let last_run = repo
      .repo_sync_health_date
      .map(|date| ((now - date) / 1000) as f64)
      .unwrap_or(-1.0);
    metrics
      .repo_health_last_run
      .with_label_values(&[&repo.pulp_server_name, &repo.repo_name])
      .set(last_run);
  }

  for task in &tasks {
    let Some(server_name) = task_server_name(&task.name) else {
      continue;
    };
    for (state, gauge) in &metrics.tasks_by_state {
      if task.state == *state {
        gauge.with_label_values(&[server_name]).inc();
      }
    }
  }

  probe_backends(&servers).await;
  Ok(())
}

/// Probes each backend's /status/ endpoint for database and redis health.
/// An unreachable backend just has no series this scrape.
async fn probe_backends(servers: &[PulpServer]) {
  let metrics = metrics();
  let client = reqwest::Client::builder()
    .timeout(Duration::from_secs(3))
    .build()
    .expect("failed to build status probe client");

  let probes = servers.iter().map(|server| {
    let client = client.clone();
    async move {
      let url =
        format!("https://{}/pulp/api/v3/status/", server.name);
      let status: serde_json::Value =
        client.get(&url).send().await.ok()?.json().await.ok()?;
      let database_connected = status["database_connection"]
        ["connected"]
        .as_bool()
        .unwrap_or(false);
      let redis_connected = status["redis_connection"]["connected"]
        .as_bool()
        .unwrap_or(false);
      Some((server.name.clone(), database_connected, redis_connected))
    }
  });

  for probe in join_all(probes).await.into_iter().flatten() {
    let (name, database_connected, redis_connected) = probe;
    metrics
      .database_connection
      .with_label_values(&[&name])
      .set(database_connected as i64 as f64);
    metrics
      .redis_connection
      .with_label_values(&[&name])
      .set(redis_connected as i64 as f64);
  }
}

async fn metrics_handler() -> (axum::http::StatusCode, String) {
  if let Err(e) = collect().await {
    error!("metrics collection failed | {e:#}");
    return (
      axum::http::StatusCode::INTERNAL_SERVER_ERROR,
      format!("metrics collection failed: {e:#}"),
    );
  }
  let encoder = TextEncoder::new();
  let mut buffer = Vec::new();
  match encoder.encode(&metrics().registry.gather(), &mut buffer) {
    Ok(()) => (
      axum::http::StatusCode::OK,
      String::from_utf8(buffer).unwrap_or_default(),
    ),
    Err(e) => (
      axum::http::StatusCode::INTERNAL_SERVER_ERROR,
      format!("failed to encode metrics: {e}"),
    ),
  }
}

/// Serves /metrics on the configured metrics port.
pub fn spawn_metrics_server() {
  tokio::spawn(async {
    let config = core_config();
    let addr =
      format!("{}:{}", config.api.bind_ip, config.metrics.port);
    let app = Router::new().route("/metrics", get(metrics_handler));
    info!("metrics listening on {addr}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
      Ok(listener) => listener,
      Err(e) => {
        error!("failed to bind metrics listener on {addr} | {e:#}");
        return;
      }
    };
    if let Err(e) = axum::serve(listener, app).await {
      error!("metrics server exited | {e:#}");
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn task_names_carry_the_server_hostname() {
    assert_eq!(
      task_server_name("repo sync pulp01.example.com"),
      Some("pulp01.example.com")
    );
    assert_eq!(
      task_server_name("pulp01.example.com repo sync ext-foo"),
      Some("pulp01.example.com")
    );
    assert_eq!(task_server_name("no hostname here"), None);
  }
}
