use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::I64;

/// Per-registry job counts for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
  pub name: String,
  pub queued_jobs: u64,
  pub deferred_jobs: u64,
  pub started_jobs: u64,
  pub finished_jobs: u64,
  pub failed_jobs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
  pub id: String,
  pub args: Value,
  pub meta: Value,
  pub status: String,
  pub enqueued_at: Option<I64>,
  pub started_at: Option<I64>,
  pub ended_at: Option<I64>,
  pub result_ttl: Option<u64>,
  pub ttl: Option<u64>,
  pub timeout: Option<u64>,
}

/// Job view including the exception trace, only returned by the by-id
/// lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetailedResponse {
  #[serde(flatten)]
  pub job: JobResponse,
  pub exc_info: Option<String>,
}
