//! Redis-backed named FIFO job queues.
//!
//! Key layout (all under the `pm:` prefix):
//! - `pm:queues` — set of known queue names
//! - `pm:queue:<name>` — list of ready job ids (the queued registry)
//! - `pm:queue:<name>:<registry>` — zset of job ids scored by entry time,
//!   for the deferred / started / finished / failed / canceled registries
//! - `pm:scheduler:<name>` — zset of cron job ids scored by next fire time
//! - `pm:job:<id>` — JSON payload of one [Job]
//!
//! A single scheduler process materialises due cron jobs into the ready
//! list; any number of named workers pop from the list.

use chrono::{DateTime, Utc};
use croner::Cron;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde_json::Value;
use uuid::Uuid;

mod job;

pub use job::{Job, JobKind, JobStatus};

pub const DEFAULT_QUEUE: &str = "default";
/// Finished / failed payloads are kept for a day.
const DEFAULT_RESULT_TTL: u64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("redis error: {0}")]
  Redis(#[from] redis::RedisError),
  #[error("job {0} not found")]
  JobNotFound(String),
  #[error("queue {0} not found")]
  QueueNotFound(String),
  #[error("invalid cron expression '{expr}': {error}")]
  InvalidCron { expr: String, error: String },
  #[error("failed to serialize job: {0}")]
  Serialize(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, QueueError>;

/// The registries a queue exposes over the API. `Queued` is the ready list
/// itself; the rest are zsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
  Queued,
  Deferred,
  Started,
  Finished,
  Failed,
  Canceled,
}

impl Registry {
  pub fn from_name(name: &str) -> Option<Registry> {
    match name {
      "queued" => Some(Registry::Queued),
      "deferred" => Some(Registry::Deferred),
      "started" => Some(Registry::Started),
      "finished" => Some(Registry::Finished),
      "failed" => Some(Registry::Failed),
      "canceled" => Some(Registry::Canceled),
      _ => None,
    }
  }

  fn key_suffix(&self) -> &'static str {
    match self {
      Registry::Queued => "",
      Registry::Deferred => ":deferred",
      Registry::Started => ":started",
      Registry::Finished => ":finished",
      Registry::Failed => ":failed",
      Registry::Canceled => ":canceled",
    }
  }
}

fn queues_key() -> &'static str {
  "pm:queues"
}

fn queue_key(queue: &str) -> String {
  format!("pm:queue:{queue}")
}

fn registry_key(queue: &str, registry: Registry) -> String {
  format!("pm:queue:{queue}{}", registry.key_suffix())
}

fn scheduler_key(queue: &str) -> String {
  format!("pm:scheduler:{queue}")
}

fn job_key(id: &str) -> String {
  format!("pm:job:{id}")
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Computes the next fire time of a cron expression, strictly after `after`.
pub fn next_occurrence(
  expr: &str,
  after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
  let cron: Cron =
    expr.parse().map_err(|e| QueueError::InvalidCron {
      expr: expr.to_string(),
      error: format!("{e}"),
    })?;
  cron
    .find_next_occurrence(&after, false)
    .map_err(|e| QueueError::InvalidCron {
      expr: expr.to_string(),
      error: format!("{e}"),
    })
}

#[derive(Clone)]
pub struct QueueClient {
  conn: ConnectionManager,
}

impl QueueClient {
  pub async fn new(redis_url: &str) -> Result<QueueClient> {
    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok(QueueClient { conn })
  }

  async fn save_job(&self, job: &Job) -> Result<()> {
    let mut conn = self.conn.clone();
    let payload = serde_json::to_string(job)?;
    let _: () = conn.set(job_key(&job.id), payload).await?;
    Ok(())
  }

  pub async fn get_job(&self, id: &str) -> Result<Job> {
    let mut conn = self.conn.clone();
    let payload: Option<String> = conn.get(job_key(id)).await?;
    let payload =
      payload.ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
    Ok(serde_json::from_str(&payload)?)
  }

  /// Enqueues a ready job at the tail of the queue.
  pub async fn enqueue(
    &self,
    queue: &str,
    kind: JobKind,
    args: Value,
    timeout: Option<u64>,
  ) -> Result<Job> {
    let job = Job {
      id: Uuid::new_v4().to_string(),
      queue: queue.to_string(),
      kind,
      args,
      meta: Value::Object(Default::default()),
      status: JobStatus::Queued,
      enqueued_at: Some(now_ms()),
      started_at: None,
      ended_at: None,
      result_ttl: Some(DEFAULT_RESULT_TTL),
      ttl: None,
      timeout,
      cron: None,
      exc_info: None,
    };
    self.save_job(&job).await?;
    let mut conn = self.conn.clone();
    let _: () = conn.sadd(queues_key(), queue).await?;
    let _: () = conn.rpush(queue_key(queue), &job.id).await?;
    Ok(job)
  }

  /// Registers a cron job under a caller-chosen id. An existing job with
  /// the same id is replaced atomically: the payload is overwritten and the
  /// zset score moves to the new expression's next fire time.
  pub async fn schedule_cron(
    &self,
    queue: &str,
    cron_expr: &str,
    kind: JobKind,
    args: Value,
    job_id: &str,
    timeout: Option<u64>,
  ) -> Result<Job> {
    let next = next_occurrence(cron_expr, Utc::now())?;
    let job = Job {
      id: job_id.to_string(),
      queue: queue.to_string(),
      kind,
      args,
      meta: Value::Object(Default::default()),
      status: JobStatus::Scheduled,
      enqueued_at: None,
      started_at: None,
      ended_at: None,
      result_ttl: Some(DEFAULT_RESULT_TTL),
      ttl: None,
      timeout,
      cron: Some(cron_expr.to_string()),
      exc_info: None,
    };
    self.save_job(&job).await?;
    let mut conn = self.conn.clone();
    let _: () = conn.sadd(queues_key(), queue).await?;
    let _: () = conn
      .zadd(scheduler_key(queue), job_id, next.timestamp_millis())
      .await?;
    Ok(job)
  }

  /// Removes a cron job. Missing ids are fine: deregistration must be
  /// idempotent for the config reconciler.
  pub async fn deschedule(&self, queue: &str, job_id: &str) -> Result<()> {
    let mut conn = self.conn.clone();
    let _: () = conn.zrem(scheduler_key(queue), job_id).await?;
    let _: () = conn.del(job_key(job_id)).await?;
    Ok(())
  }

  /// All cron jobs registered on a queue, ordered by next fire time.
  pub async fn scheduled_jobs(&self, queue: &str) -> Result<Vec<Job>> {
    let mut conn = self.conn.clone();
    let ids: Vec<String> =
      conn.zrange(scheduler_key(queue), 0, -1).await?;
    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
      match self.get_job(&id).await {
        Ok(job) => jobs.push(job),
        Err(QueueError::JobNotFound(_)) => continue,
        Err(e) => return Err(e),
      }
    }
    Ok(jobs)
  }

  /// One scheduler tick: clones every due cron job into the ready list and
  /// advances its score to the next fire time. Returns how many fired.
  pub async fn enqueue_due_scheduled(&self, queue: &str) -> Result<usize> {
    let mut conn = self.conn.clone();
    let now = Utc::now();
    let due: Vec<String> = conn
      .zrangebyscore(
        scheduler_key(queue),
        f64::NEG_INFINITY,
        now.timestamp_millis() as f64,
      )
      .await?;

    let mut fired = 0;
    for id in due {
      let template = match self.get_job(&id).await {
        Ok(job) => job,
        Err(QueueError::JobNotFound(_)) => {
          let _: () = conn.zrem(scheduler_key(queue), &id).await?;
          continue;
        }
        Err(e) => return Err(e),
      };

      let run = Job {
        id: Uuid::new_v4().to_string(),
        status: JobStatus::Queued,
        enqueued_at: Some(now_ms()),
        cron: None,
        ..template.clone()
      };
      self.save_job(&run).await?;
      let _: () = conn.rpush(queue_key(queue), &run.id).await?;
      fired += 1;

      match template.cron.as_deref() {
        Some(expr) => {
          let next = next_occurrence(expr, now)?;
          let _: () = conn
            .zadd(scheduler_key(queue), &id, next.timestamp_millis())
            .await?;
        }
        // One-shot scheduled job, drop it after firing.
        None => {
          let _: () = conn.zrem(scheduler_key(queue), &id).await?;
        }
      }
    }
    Ok(fired)
  }

  /// Pops the next ready job and moves it into the started registry under
  /// the given worker name. Canceled jobs are skipped.
  pub async fn fetch_next(
    &self,
    queue: &str,
    worker_name: &str,
  ) -> Result<Option<Job>> {
    let mut conn = self.conn.clone();
    loop {
      let id: Option<String> =
        conn.lpop(queue_key(queue), None).await?;
      let Some(id) = id else {
        return Ok(None);
      };
      let mut job = match self.get_job(&id).await {
        Ok(job) => job,
        Err(QueueError::JobNotFound(_)) => continue,
        Err(e) => return Err(e),
      };
      if job.status == JobStatus::Canceled {
        continue;
      }
      job.status = JobStatus::Started;
      job.started_at = Some(now_ms());
      job.meta["worker_name"] = Value::String(worker_name.to_string());
      self.save_job(&job).await?;
      let _: () = conn
        .zadd(
          registry_key(queue, Registry::Started),
          &job.id,
          now_ms(),
        )
        .await?;
      return Ok(Some(job));
    }
  }

  /// Records the outcome of a started job and moves it between registries.
  pub async fn finish_job(
    &self,
    job: &Job,
    exc_info: Option<String>,
  ) -> Result<Job> {
    let mut conn = self.conn.clone();
    let mut job = job.clone();
    job.ended_at = Some(now_ms());
    job.status = if exc_info.is_some() {
      JobStatus::Failed
    } else {
      JobStatus::Finished
    };
    job.exc_info = exc_info;
    self.save_job(&job).await?;

    let _: () = conn
      .zrem(registry_key(&job.queue, Registry::Started), &job.id)
      .await?;
    let registry = if job.status == JobStatus::Failed {
      Registry::Failed
    } else {
      Registry::Finished
    };
    let _: () = conn
      .zadd(registry_key(&job.queue, registry), &job.id, now_ms())
      .await?;
    if let Some(result_ttl) = job.result_ttl {
      let _: () =
        conn.expire(job_key(&job.id), result_ttl as i64).await?;
    }
    Ok(job)
  }

  /// Cancels a job. A queued job never starts (workers skip canceled
  /// payloads); a started job keeps running until its controller observes
  /// the cancellation at the next stage boundary.
  pub async fn cancel_job(&self, id: &str) -> Result<Job> {
    let mut conn = self.conn.clone();
    let mut job = self.get_job(id).await?;
    if matches!(
      job.status,
      JobStatus::Finished | JobStatus::Failed | JobStatus::Canceled
    ) {
      return Ok(job);
    }
    if job.status == JobStatus::Queued {
      let _: () = conn.lrem(queue_key(&job.queue), 0, id).await?;
    }
    let _: () = conn
      .zrem(registry_key(&job.queue, Registry::Started), id)
      .await?;
    job.status = JobStatus::Canceled;
    job.ended_at = Some(now_ms());
    self.save_job(&job).await?;
    let _: () = conn
      .zadd(
        registry_key(&job.queue, Registry::Canceled),
        id,
        now_ms(),
      )
      .await?;
    Ok(job)
  }

  pub async fn queues(&self) -> Result<Vec<String>> {
    let mut conn = self.conn.clone();
    let mut queues: Vec<String> = conn.smembers(queues_key()).await?;
    queues.sort();
    Ok(queues)
  }

  pub async fn queue_exists(&self, queue: &str) -> Result<bool> {
    let mut conn = self.conn.clone();
    Ok(conn.sismember(queues_key(), queue).await?)
  }

  /// Job counts per registry for one queue.
  pub async fn queue_stats(
    &self,
    queue: &str,
  ) -> Result<(u64, u64, u64, u64, u64)> {
    if !self.queue_exists(queue).await? {
      return Err(QueueError::QueueNotFound(queue.to_string()));
    }
    let mut conn = self.conn.clone();
    let queued: u64 = conn.llen(queue_key(queue)).await?;
    let deferred: u64 =
      conn.zcard(registry_key(queue, Registry::Deferred)).await?;
    let started: u64 =
      conn.zcard(registry_key(queue, Registry::Started)).await?;
    let finished: u64 =
      conn.zcard(registry_key(queue, Registry::Finished)).await?;
    let failed: u64 =
      conn.zcard(registry_key(queue, Registry::Failed)).await?;
    Ok((queued, deferred, started, finished, failed))
  }

  /// One page of jobs from a registry. Pages are 1-based; jobs whose
  /// payload already expired are skipped.
  pub async fn registry_jobs(
    &self,
    queue: &str,
    registry: Registry,
    page: u64,
    page_size: u64,
  ) -> Result<(Vec<Job>, u64)> {
    if !self.queue_exists(queue).await? {
      return Err(QueueError::QueueNotFound(queue.to_string()));
    }
    let mut conn = self.conn.clone();
    let page = page.max(1);
    let start = ((page - 1) * page_size) as isize;
    let stop = start + page_size as isize - 1;

    let (ids, total): (Vec<String>, u64) = match registry {
      Registry::Queued => {
        let ids = conn.lrange(queue_key(queue), start, stop).await?;
        let total = conn.llen(queue_key(queue)).await?;
        (ids, total)
      }
      registry => {
        let key = registry_key(queue, registry);
        let ids = conn.zrange(&key, start, stop).await?;
        let total = conn.zcard(&key).await?;
        (ids, total)
      }
    };

    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
      match self.get_job(&id).await {
        Ok(job) => jobs.push(job),
        Err(QueueError::JobNotFound(_)) => continue,
        Err(e) => return Err(e),
      }
    }
    Ok((jobs, total))
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn job_payload_round_trips() {
    let job = Job {
      id: "abc".to_string(),
      queue: DEFAULT_QUEUE.to_string(),
      kind: JobKind::SyncRepos,
      args: serde_json::json!({ "name": "p1", "max_concurrent_syncs": 2 }),
      meta: serde_json::json!({}),
      status: JobStatus::Queued,
      enqueued_at: Some(1),
      started_at: None,
      ended_at: None,
      result_ttl: Some(500),
      ttl: None,
      timeout: Some(3600),
      cron: None,
      exc_info: None,
    };
    let payload = serde_json::to_string(&job).unwrap();
    assert!(payload.contains("\"kind\":\"sync_repos\""));
    let back: Job = serde_json::from_str(&payload).unwrap();
    assert_eq!(back.kind, JobKind::SyncRepos);
    assert_eq!(back.status, JobStatus::Queued);
  }

  #[test]
  fn next_occurrence_advances() {
    let after = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
    let next = next_occurrence("0 12 * * *", after).unwrap();
    assert_eq!(
      next,
      Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    );
    assert!(next_occurrence("not a cron", after).is_err());
  }

  #[test]
  fn registry_names_resolve() {
    assert_eq!(Registry::from_name("started"), Some(Registry::Started));
    assert_eq!(Registry::from_name("bogus"), None);
    assert_eq!(
      registry_key("default", Registry::Failed),
      "pm:queue:default:failed"
    );
    assert_eq!(registry_key("default", Registry::Queued), "pm:queue:default");
  }
}
