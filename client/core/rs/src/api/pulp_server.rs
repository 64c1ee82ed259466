use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::{
  I64, MongoId,
  repo::RepoKind,
  server::{PulpServer, PulpServerRepo, PulpServerRepoGroup},
};

/// View of a managed backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerResponse {
  pub id: MongoId,
  pub name: String,
  pub username: String,
  pub vault_service_account_mount: Option<String>,
  /// Health name (`green` / `amber` / `red`), null when never computed.
  pub repo_sync_health_rollup: Option<String>,
  pub repo_sync_health_rollup_date: Option<I64>,
  pub snapshot_supported: bool,
  pub max_concurrent_snapshots: Option<u16>,
  pub repo_config_registration_schedule: Option<String>,
  pub repo_config_registration_max_runtime: Option<String>,
  pub repo_config_registration_regex_include: Option<String>,
  pub repo_config_registration_regex_exclude: Option<String>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

impl From<PulpServer> for PulpServerResponse {
  fn from(server: PulpServer) -> Self {
    PulpServerResponse {
      id: server.id,
      name: server.name,
      username: server.username,
      vault_service_account_mount: server.vault_service_account_mount,
      repo_sync_health_rollup: server
        .repo_sync_health_rollup
        .map(|h| h.to_string()),
      repo_sync_health_rollup_date: server.repo_sync_health_rollup_date,
      snapshot_supported: server.snapshot_supported,
      max_concurrent_snapshots: server.max_concurrent_snapshots,
      repo_config_registration_schedule: server
        .repo_config_registration_schedule,
      repo_config_registration_max_runtime: server
        .repo_config_registration_max_runtime,
      repo_config_registration_regex_include: server
        .repo_config_registration_regex_include,
      repo_config_registration_regex_exclude: server
        .repo_config_registration_regex_exclude,
      date_created: server.date_created,
      date_last_updated: server.date_last_updated,
    }
  }
}

/// View of a repo as bound to one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepoResponse {
  pub id: MongoId,
  pub name: String,
  pub repo_type: RepoKind,
  pub pulp_server_id: MongoId,
  pub repo_id: MongoId,
  pub repo_href: String,
  pub remote_href: Option<String>,
  pub remote_feed: Option<String>,
  pub distribution_href: Option<String>,
  pub repo_sync_health: Option<String>,
  pub repo_sync_health_date: Option<I64>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

impl From<PulpServerRepo> for PulpServerRepoResponse {
  fn from(repo: PulpServerRepo) -> Self {
    PulpServerRepoResponse {
      id: repo.id,
      name: repo.repo_name,
      repo_type: repo.repo_type,
      pulp_server_id: repo.pulp_server_id,
      repo_id: repo.repo_id,
      repo_href: repo.repo_href,
      remote_href: repo.remote_href,
      remote_feed: repo.remote_feed,
      distribution_href: repo.distribution_href,
      repo_sync_health: repo.repo_sync_health.map(|h| h.to_string()),
      repo_sync_health_date: repo.repo_sync_health_date,
      date_created: repo.date_created,
      date_last_updated: repo.date_last_updated,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepoGroupResponse {
  pub pulp_server_id: MongoId,
  pub repo_group_id: MongoId,
  pub name: String,
  pub schedule: Option<String>,
  pub max_concurrent_syncs: u16,
  pub max_runtime: String,
  pub date_created: I64,
  pub date_last_updated: I64,
}

impl From<PulpServerRepoGroup> for PulpServerRepoGroupResponse {
  fn from(group: PulpServerRepoGroup) -> Self {
    PulpServerRepoGroupResponse {
      pulp_server_id: group.pulp_server_id,
      repo_group_id: group.repo_group_id,
      name: group.repo_group_name,
      schedule: group.schedule,
      max_concurrent_syncs: group.max_concurrent_syncs,
      max_runtime: group.max_runtime,
      date_created: group.date_created,
      date_last_updated: group.date_last_updated,
    }
  }
}

/// Body for an ad-hoc sync run. `sync_options` are repo-type specific and
/// passed to the backend sync call as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerSyncConfig {
  pub max_runtime: String,
  pub max_concurrent_syncs: u16,
  #[serde(default)]
  pub regex_include: Option<String>,
  #[serde(default)]
  pub regex_exclude: Option<String>,
  #[serde(default)]
  pub source_pulp_server_name: Option<String>,
  #[serde(default)]
  pub sync_options: Option<Value>,
}

/// Body for a snapshot run. The prefix is normalised to end with `-`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerSnapshotConfig {
  pub max_runtime: String,
  pub snapshot_prefix: String,
  #[serde(default)]
  pub allow_snapshot_reuse: bool,
  #[serde(default)]
  pub regex_include: Option<String>,
  #[serde(default)]
  pub regex_exclude: Option<String>,
}

/// Body for a bulk repo removal. At least one regex must be given;
/// `dry_run` defaults to true so nothing is deleted by accident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepoRemovalConfig {
  pub max_runtime: String,
  #[serde(default)]
  pub regex_include: Option<String>,
  #[serde(default)]
  pub regex_exclude: Option<String>,
  #[serde(default = "default_dry_run")]
  pub dry_run: bool,
}

fn default_dry_run() -> bool {
  true
}

/// Package content filters applied to a repo's latest version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindRepoPackageContent {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub sha256: Option<String>,
}

/// Body for removing a single content unit from a repo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRepoContent {
  pub content_href: String,
  pub max_runtime: String,
  #[serde(default)]
  pub force_publish: bool,
}
