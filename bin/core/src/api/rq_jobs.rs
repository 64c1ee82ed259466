use axum::{
  Json, Router,
  extract::{Path, Query},
  routing::get,
};
use job_queue::{Job, QueueError, Registry};
use pulp_manager_client::api::{
  Page,
  rq_jobs::{JobDetailedResponse, JobResponse, QueueStats},
};
use reqwest::StatusCode;
use serror::AddStatusCodeError as _;

use crate::{config::core_config, state::queue_client};

pub fn router() -> Router {
  Router::new()
    .route("/queues", get(get_all_queues))
    .route("/queues/{name}", get(get_queue))
    .route("/queues/{name}/scheduled", get(get_queue_scheduled))
    .route("/queues/{name}/jobs/{registry}", get(get_registry_jobs))
    .route("/queues/jobs/{id}", get(get_job))
}

fn job_response(job: Job) -> JobResponse {
  JobResponse {
    id: job.id,
    args: job.args,
    meta: job.meta,
    status: job.status.to_string(),
    enqueued_at: job.enqueued_at,
    started_at: job.started_at,
    ended_at: job.ended_at,
    result_ttl: job.result_ttl,
    ttl: job.ttl,
    timeout: job.timeout,
  }
}

fn queue_error_status(e: QueueError) -> serror::Error {
  let status = match &e {
    QueueError::QueueNotFound(_) | QueueError::JobNotFound(_) => {
      StatusCode::NOT_FOUND
    }
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  };
  anyhow::Error::new(e).status_code(status)
}

async fn get_all_queues() -> serror::Result<Json<Vec<String>>> {
  let queues = queue_client()
    .queues()
    .await
    .map_err(queue_error_status)?;
  Ok(Json(queues))
}

async fn get_queue(
  Path(name): Path<String>,
) -> serror::Result<Json<QueueStats>> {
  let (queued, deferred, started, finished, failed) = queue_client()
    .queue_stats(&name)
    .await
    .map_err(queue_error_status)?;
  Ok(Json(QueueStats {
    name,
    queued_jobs: queued,
    deferred_jobs: deferred,
    started_jobs: started,
    finished_jobs: finished,
    failed_jobs: failed,
  }))
}

/// Cron jobs waiting in the scheduler registry for this queue.
async fn get_queue_scheduled(
  Path(name): Path<String>,
  Query(paging): Query<super::Paging>,
) -> serror::Result<Json<Page<JobResponse>>> {
  check_page_size(paging.page_size())?;
  let jobs = queue_client()
    .scheduled_jobs(&name)
    .await
    .map_err(queue_error_status)?;

  let page = paging.page().max(1);
  let page_size = paging.page_size();
  let total = jobs.len() as u64;
  let start = ((page - 1) * page_size) as usize;
  let items = jobs
    .into_iter()
    .skip(start)
    .take(page_size as usize)
    .map(job_response)
    .collect();

  Ok(Json(Page {
    items,
    total,
    page,
    page_size,
  }))
}

async fn get_registry_jobs(
  Path((name, registry)): Path<(String, String)>,
  Query(paging): Query<super::Paging>,
) -> serror::Result<Json<Page<JobResponse>>> {
  check_page_size(paging.page_size())?;
  let registry = Registry::from_name(&registry).ok_or_else(|| {
    anyhow::anyhow!("unknown registry {registry}")
      .status_code(StatusCode::NOT_FOUND)
  })?;

  let (jobs, total) = queue_client()
    .registry_jobs(&name, registry, paging.page(), paging.page_size())
    .await
    .map_err(queue_error_status)?;

  Ok(Json(Page {
    items: jobs.into_iter().map(job_response).collect(),
    total,
    page: paging.page().max(1),
    page_size: paging.page_size(),
  }))
}

/// One job, including its exception trace when it failed.
async fn get_job(
  Path(id): Path<String>,
) -> serror::Result<Json<JobDetailedResponse>> {
  let job = queue_client()
    .get_job(&id)
    .await
    .map_err(queue_error_status)?;
  let exc_info = job.exc_info.clone();
  Ok(Json(JobDetailedResponse {
    job: job_response(job),
    exc_info,
  }))
}

fn check_page_size(page_size: u64) -> serror::Result<()> {
  let max = core_config().redis.max_page_size;
  if page_size > max {
    return Err(
      anyhow::anyhow!(
        "page_size larger than {max} not allowed for rq jobs"
      )
      .status_code(StatusCode::BAD_REQUEST)
      .into(),
    );
  }
  Ok(())
}
