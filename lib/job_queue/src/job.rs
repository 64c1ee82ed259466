use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// The callables a worker can run. The variant name is what gets persisted
/// in the job payload, so renames are a wire format change.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
  SyncRepos,
  SnapshotRepos,
  RemoveRepos,
  RemoveRepoContent,
  RegisterRepoConfigs,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Deferred,
  Started,
  Finished,
  Failed,
  Canceled,
  Scheduled,
}

/// A serialized unit of work. Scheduled (cron) jobs carry their cron
/// expression and live only in the scheduler registry; the scheduler clones
/// them into the ready queue at each fire time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub id: String,
  pub queue: String,
  pub kind: JobKind,
  #[serde(default)]
  pub args: Value,
  #[serde(default)]
  pub meta: Value,
  pub status: JobStatus,
  #[serde(default)]
  pub enqueued_at: Option<i64>,
  #[serde(default)]
  pub started_at: Option<i64>,
  #[serde(default)]
  pub ended_at: Option<i64>,
  /// Seconds a finished job's payload is retained.
  #[serde(default)]
  pub result_ttl: Option<u64>,
  /// Seconds a queued job may wait before it is discarded.
  #[serde(default)]
  pub ttl: Option<u64>,
  /// Job-level execution timeout in seconds.
  #[serde(default)]
  pub timeout: Option<u64>,
  #[serde(default)]
  pub cron: Option<String>,
  #[serde(default)]
  pub exc_info: Option<String>,
}
