use serde::{Deserialize, Serialize};

use super::{
  I64, MongoId,
  repo::{RepoHealthStatus, RepoKind},
};

/// A backend content-repository server managed by Pulp Manager. The API
/// service account password is read from vault by
/// `(username, vault_service_account_mount)` unless local mode is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServer {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  /// Host label, also the address the API is reached on.
  pub name: String,
  pub username: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vault_service_account_mount: Option<String>,
  /// Derived: red if any repo is red, amber if any is amber, else green.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_sync_health_rollup: Option<RepoHealthStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_sync_health_rollup_date: Option<I64>,
  #[serde(default)]
  pub snapshot_supported: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrent_snapshots: Option<u16>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_config_registration_schedule: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_config_registration_max_runtime: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_config_registration_regex_include: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_config_registration_regex_exclude: Option<String>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

/// Per-backend scheduling parameters for a repo group. Unique on
/// (pulp_server_id, repo_group_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepoGroup {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub pulp_server_id: MongoId,
  pub repo_group_id: MongoId,
  /// Denormalised from the repo group for filtering by name.
  pub repo_group_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schedule: Option<String>,
  pub max_concurrent_syncs: u16,
  /// Job-level timeout as a duration literal, e.g. `4h`.
  pub max_runtime: String,
  /// The upstream backend this one registers repos from before syncing.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pulp_master_id: Option<MongoId>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

/// Binds a [Repo][super::repo::Repo] to one backend: the hrefs of the 1:1:1
/// remote / repository / distribution set it owns there, plus sync health.
/// Unique on (pulp_server_id, repo_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepo {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub pulp_server_id: MongoId,
  pub repo_id: MongoId,
  /// Denormalised from PulpServer for filtering.
  pub pulp_server_name: String,
  /// Denormalised from Repo for filtering and selection regexes.
  pub repo_name: String,
  pub repo_type: RepoKind,
  pub repo_href: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_href: Option<String>,
  /// The upstream URL the remote syncs from. Repos without one are skipped
  /// by sync selection.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_feed: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub distribution_href: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_sync_health: Option<RepoHealthStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_sync_health_date: Option<I64>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

/// Associates a PulpServerRepo with a task that acted on it. The last five
/// of these drive the repo's health classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpServerRepoTask {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub pulp_server_repo_id: MongoId,
  pub task_id: MongoId,
  pub date_created: I64,
}
