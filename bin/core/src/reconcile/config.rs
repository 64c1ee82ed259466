//! Loads the declarative sync YAML and converges the persisted model on
//! it: repo groups, backends, their bindings, and the cron schedules
//! registered in the job queue.
//!
//! Validation never mutates; the diff between config and database is
//! planned by pure functions and then applied scope by scope (repo groups
//! first, then each backend). Re-applying an unchanged file is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use database::mungos::{
  by_id::update_one_by_id,
  find::find_collect,
  mongodb::bson::{doc, oid::ObjectId, to_bson},
  update::Update,
};
use job_queue::{DEFAULT_QUEUE, JobKind};
use pulp_manager_client::entities::{
  MongoId, pulp_manager_timestamp,
  repo::RepoGroup,
  server::{PulpServer, PulpServerRepoGroup},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
  errors::PulpManagerError,
  helpers::parse_duration,
  state::{db_client, queue_client},
};

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfigFile {
  pub pulp_servers: BTreeMap<String, PulpServerConfig>,
  pub credentials: BTreeMap<String, CredentialsConfig>,
  pub repo_groups: BTreeMap<String, RepoGroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PulpServerConfig {
  pub credentials: String,
  #[serde(default)]
  pub repo_groups: BTreeMap<String, ServerRepoGroupConfig>,
  #[serde(default)]
  pub repo_config_registration: Option<RepoConfigRegistration>,
  #[serde(default)]
  pub snapshot_support: Option<SnapshotSupport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerRepoGroupConfig {
  #[serde(default)]
  pub schedule: Option<String>,
  pub max_concurrent_syncs: u16,
  pub max_runtime: String,
  #[serde(default)]
  pub pulp_master: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfigRegistration {
  pub schedule: String,
  pub max_runtime: String,
  #[serde(default)]
  pub regex_include: Option<String>,
  #[serde(default)]
  pub regex_exclude: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSupport {
  pub max_concurrent_snapshots: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
  pub username: String,
  #[serde(default)]
  pub vault_service_account_mount: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoGroupConfig {
  #[serde(default)]
  pub regex_include: Option<String>,
  #[serde(default)]
  pub regex_exclude: Option<String>,
}

/// Checks key patterns and cross references. All problems are collected and
/// reported together so one pass fixes them all; nothing is applied on
/// failure.
pub fn validate_config(config: &SyncConfigFile) -> anyhow::Result<()> {
  let server_key = regex::Regex::new(r"^[a-z0-9\.\-_]+(:[0-9]+)?$")
    .expect("invalid server key pattern");
  let group_key = regex::Regex::new(r"^[a-z][a-z0-9\-_]+$")
    .expect("invalid group key pattern");
  let credentials_key = regex::Regex::new(r"^[a-z0-9]+[a-z\-_]+$")
    .expect("invalid credentials key pattern");

  let mut config_errors = Vec::new();

  for (name, credentials) in &config.credentials {
    if !credentials_key.is_match(name) {
      config_errors.push(format!("invalid credentials name {name}"));
    }
    if credentials.vault_service_account_mount.is_none()
      && credentials.password.is_none()
    {
      config_errors.push(format!(
        "credentials {name} need either vault_service_account_mount or \
         password"
      ));
    }
  }

  for name in config.repo_groups.keys() {
    if !group_key.is_match(name) {
      config_errors.push(format!("invalid repo group name {name}"));
    }
  }

  for (server_name, server) in &config.pulp_servers {
    if !server_key.is_match(server_name) {
      config_errors.push(format!("invalid pulp server name {server_name}"));
    }
    if !config.credentials.contains_key(&server.credentials) {
      config_errors.push(format!(
        "{} missing from credentials section, required for {server_name}",
        server.credentials
      ));
    }
    for (group_name, group) in &server.repo_groups {
      if !config.repo_groups.contains_key(group_name) {
        config_errors.push(format!(
          "{group_name} missing from repo_groups section, required for \
           {server_name}"
        ));
      }
      if let Some(master) = &group.pulp_master {
        if !config.pulp_servers.contains_key(master) {
          config_errors
            .push(format!("pulp master {master} missing"));
        }
        if master == server_name {
          config_errors.push(format!(
            "{server_name} cannot be its own pulp master"
          ));
        }
      }
      if parse_duration(&group.max_runtime).is_err() {
        config_errors.push(format!(
          "invalid max_runtime '{}' for {server_name}/{group_name}",
          group.max_runtime
        ));
      }
    }
    if let Some(registration) = &server.repo_config_registration
      && parse_duration(&registration.max_runtime).is_err()
    {
      config_errors.push(format!(
        "invalid repo_config_registration max_runtime '{}' for \
         {server_name}",
        registration.max_runtime
      ));
    }
  }

  if !config_errors.is_empty() {
    return Err(
      PulpManagerError::ConfigError(format!(
        "pulp config errors: {}",
        config_errors.join(", ")
      ))
      .into(),
    );
  }
  Ok(())
}

pub fn parse_config_file(path: &Path) -> anyhow::Result<SyncConfigFile> {
  if !path.is_file() {
    return Err(
      PulpManagerError::ConfigError(format!(
        "{} is not a file",
        path.display()
      ))
      .into(),
    );
  }
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {}", path.display()))?;
  let config: SyncConfigFile = serde_yaml_ng::from_str(&contents)
    .map_err(|e| {
      PulpManagerError::ConfigError(format!(
        "{} failed validation: {e}",
        path.display()
      ))
    })?;
  validate_config(&config)?;
  Ok(config)
}

// ---- repo group diffing -------------------------------------------------

#[derive(Debug, Default)]
pub struct RepoGroupPlan {
  pub to_add: Vec<(String, RepoGroupConfig)>,
  pub to_update: Vec<(MongoId, RepoGroupConfig)>,
  pub to_remove: Vec<RepoGroup>,
}

impl RepoGroupPlan {
  pub fn is_empty(&self) -> bool {
    self.to_add.is_empty()
      && self.to_update.is_empty()
      && self.to_remove.is_empty()
  }
}

pub fn plan_repo_groups(
  existing: &[RepoGroup],
  configured: &BTreeMap<String, RepoGroupConfig>,
) -> RepoGroupPlan {
  let existing_by_name: HashMap<&str, &RepoGroup> = existing
    .iter()
    .map(|group| (group.name.as_str(), group))
    .collect();

  let mut plan = RepoGroupPlan::default();

  for (name, config) in configured {
    match existing_by_name.get(name.as_str()) {
      Some(group) => {
        if group.regex_include != config.regex_include
          || group.regex_exclude != config.regex_exclude
        {
          plan.to_update.push((group.id.clone(), config.clone()));
        }
      }
      None => plan.to_add.push((name.clone(), config.clone())),
    }
  }

  for group in existing {
    if !configured.contains_key(&group.name) {
      plan.to_remove.push(group.clone());
    }
  }

  plan
}

// ---- pulp server diffing ------------------------------------------------

/// The scalar fields of a PulpServer as the config file describes them.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFields {
  pub username: String,
  pub vault_service_account_mount: Option<String>,
  pub snapshot_supported: bool,
  pub max_concurrent_snapshots: Option<u16>,
  pub repo_config_registration_schedule: Option<String>,
  pub repo_config_registration_max_runtime: Option<String>,
  pub repo_config_registration_regex_include: Option<String>,
  pub repo_config_registration_regex_exclude: Option<String>,
}

impl ServerFields {
  pub fn from_config(
    server: &PulpServerConfig,
    credentials: &CredentialsConfig,
  ) -> ServerFields {
    let registration = server.repo_config_registration.as_ref();
    ServerFields {
      username: credentials.username.clone(),
      vault_service_account_mount: credentials
        .vault_service_account_mount
        .clone(),
      snapshot_supported: server.snapshot_support.is_some(),
      max_concurrent_snapshots: server
        .snapshot_support
        .as_ref()
        .map(|snapshot| snapshot.max_concurrent_snapshots),
      repo_config_registration_schedule: registration
        .map(|registration| registration.schedule.clone()),
      repo_config_registration_max_runtime: registration
        .map(|registration| registration.max_runtime.clone()),
      repo_config_registration_regex_include: registration
        .and_then(|registration| registration.regex_include.clone()),
      repo_config_registration_regex_exclude: registration
        .and_then(|registration| registration.regex_exclude.clone()),
    }
  }

  pub fn differs_from(&self, server: &PulpServer) -> bool {
    self.username != server.username
      || self.vault_service_account_mount
        != server.vault_service_account_mount
      || self.snapshot_supported != server.snapshot_supported
      || self.max_concurrent_snapshots != server.max_concurrent_snapshots
      || self.repo_config_registration_schedule
        != server.repo_config_registration_schedule
      || self.repo_config_registration_max_runtime
        != server.repo_config_registration_max_runtime
      || self.repo_config_registration_regex_include
        != server.repo_config_registration_regex_include
      || self.repo_config_registration_regex_exclude
        != server.repo_config_registration_regex_exclude
  }
}

/// A binding as the config file describes it, with names already resolved
/// to entity ids.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSpec {
  pub repo_group_id: MongoId,
  pub repo_group_name: String,
  pub schedule: Option<String>,
  pub max_concurrent_syncs: u16,
  pub max_runtime: String,
  pub pulp_master_id: Option<MongoId>,
}

impl BindingSpec {
  fn differs_from(&self, binding: &PulpServerRepoGroup) -> bool {
    self.schedule != binding.schedule
      || self.max_concurrent_syncs != binding.max_concurrent_syncs
      || self.max_runtime != binding.max_runtime
      || self.pulp_master_id != binding.pulp_master_id
      || self.repo_group_name != binding.repo_group_name
  }
}

#[derive(Debug, Default)]
pub struct BindingPlan {
  pub to_add: Vec<BindingSpec>,
  pub to_update: Vec<(MongoId, BindingSpec)>,
  pub to_remove: Vec<PulpServerRepoGroup>,
}

impl BindingPlan {
  pub fn is_empty(&self) -> bool {
    self.to_add.is_empty()
      && self.to_update.is_empty()
      && self.to_remove.is_empty()
  }
}

pub fn plan_bindings(
  existing: &[PulpServerRepoGroup],
  configured: &BTreeMap<String, ServerRepoGroupConfig>,
  group_ids: &HashMap<String, MongoId>,
  server_ids: &HashMap<String, MongoId>,
) -> BindingPlan {
  let existing_by_group: HashMap<&str, &PulpServerRepoGroup> = existing
    .iter()
    .map(|binding| (binding.repo_group_name.as_str(), binding))
    .collect();

  let mut plan = BindingPlan::default();

  for (group_name, config) in configured {
    let Some(repo_group_id) = group_ids.get(group_name) else {
      continue;
    };
    let pulp_master_id = config
      .pulp_master
      .as_ref()
      .and_then(|master| server_ids.get(master))
      .cloned();
    let spec = BindingSpec {
      repo_group_id: repo_group_id.clone(),
      repo_group_name: group_name.clone(),
      schedule: config.schedule.clone(),
      max_concurrent_syncs: config.max_concurrent_syncs,
      max_runtime: config.max_runtime.clone(),
      pulp_master_id,
    };
    match existing_by_group.get(group_name.as_str()) {
      Some(binding) => {
        if spec.differs_from(binding) {
          plan.to_update.push((binding.id.clone(), spec));
        }
      }
      None => plan.to_add.push(spec),
    }
  }

  for binding in existing {
    if !configured.contains_key(&binding.repo_group_name) {
      plan.to_remove.push(binding.clone());
    }
  }

  plan
}

// ---- schedule ids -------------------------------------------------------

pub fn sync_schedule_job_id(server: &str, group: &str) -> String {
  format!("repo_sync_{server}_{group}")
}

pub fn registration_schedule_job_id(server: &str) -> String {
  format!("repo_config_registration_{server}")
}

// ---- apply --------------------------------------------------------------

pub struct ConfigParser;

impl ConfigParser {
  /// Parses, validates, and converges the database and schedule registry
  /// on the config file.
  pub async fn load_config(path: &Path) -> anyhow::Result<()> {
    info!("loading config from {} and updating db", path.display());
    let config = parse_config_file(path)?;

    let repo_groups = Self::process_repo_groups(&config).await?;
    Self::process_pulp_servers(&config, &repo_groups).await?;

    info!("config successfully loaded");
    Ok(())
  }

  /// Applies repo group changes and returns the resulting name → id map.
  async fn process_repo_groups(
    config: &SyncConfigFile,
  ) -> anyhow::Result<HashMap<String, MongoId>> {
    let db = db_client();
    let existing = find_collect(&db.repo_groups, None, None)
      .await
      .context("failed to query repo groups")?;

    let plan = plan_repo_groups(&existing, &config.repo_groups);
    let now = pulp_manager_timestamp();

    for (name, group_config) in &plan.to_add {
      info!("adding repo group {name}");
      let group = RepoGroup {
        id: String::new(),
        name: name.clone(),
        regex_include: group_config.regex_include.clone(),
        regex_exclude: group_config.regex_exclude.clone(),
        date_created: now,
        date_last_updated: now,
      };
      db.repo_groups
        .insert_one(&group)
        .await
        .context("failed to insert repo group")?;
    }

    for (id, group_config) in &plan.to_update {
      info!("updating repo group {id}");
      update_one_by_id(
        &db.repo_groups,
        id,
        Update::Set(doc! {
          "regex_include": to_bson(&group_config.regex_include)?,
          "regex_exclude": to_bson(&group_config.regex_exclude)?,
          "date_last_updated": now,
        }),
        None,
      )
      .await
      .context("failed to update repo group")?;
    }

    for group in &plan.to_remove {
      info!("removing repo group {}", group.name);
      db.repo_groups
        .delete_one(doc! { "_id": ObjectId::parse_str(&group.id)? })
        .await
        .context("failed to remove repo group")?;
    }

    let groups = find_collect(&db.repo_groups, None, None)
      .await
      .context("failed to query repo groups")?;
    Ok(
      groups
        .into_iter()
        .map(|group| (group.name, group.id))
        .collect(),
    )
  }

  async fn process_pulp_servers(
    config: &SyncConfigFile,
    group_ids: &HashMap<String, MongoId>,
  ) -> anyhow::Result<()> {
    let db = db_client();
    let now = pulp_manager_timestamp();

    // Add missing servers first so pulp_master references resolve even
    // when master and slave arrive in the same config pass.
    let mut existing: HashMap<String, PulpServer> =
      find_collect(&db.pulp_servers, None, None)
        .await
        .context("failed to query pulp servers")?
        .into_iter()
        .map(|server| (server.name.clone(), server))
        .collect();

    for (name, server_config) in &config.pulp_servers {
      if existing.contains_key(name) {
        continue;
      }
      info!("adding pulp server {name}");
      let credentials = &config.credentials[&server_config.credentials];
      let fields = ServerFields::from_config(server_config, credentials);
      let server = PulpServer {
        id: String::new(),
        name: name.clone(),
        username: fields.username,
        vault_service_account_mount: fields.vault_service_account_mount,
        repo_sync_health_rollup: None,
        repo_sync_health_rollup_date: None,
        snapshot_supported: fields.snapshot_supported,
        max_concurrent_snapshots: fields.max_concurrent_snapshots,
        repo_config_registration_schedule: fields
          .repo_config_registration_schedule,
        repo_config_registration_max_runtime: fields
          .repo_config_registration_max_runtime,
        repo_config_registration_regex_include: fields
          .repo_config_registration_regex_include,
        repo_config_registration_regex_exclude: fields
          .repo_config_registration_regex_exclude,
        date_created: now,
        date_last_updated: now,
      };
      db.pulp_servers
        .insert_one(&server)
        .await
        .context("failed to insert pulp server")?;
    }

    existing = find_collect(&db.pulp_servers, None, None)
      .await
      .context("failed to query pulp servers")?
      .into_iter()
      .map(|server| (server.name.clone(), server))
      .collect();
    let server_ids: HashMap<String, MongoId> = existing
      .iter()
      .map(|(name, server)| (name.clone(), server.id.clone()))
      .collect();

    for (name, server_config) in &config.pulp_servers {
      let server = &existing[name];
      Self::apply_server(
        config,
        server,
        server_config,
        group_ids,
        &server_ids,
      )
      .await
      .with_context(|| format!("failed to update pulp server {name}"))?;
    }

    let to_remove: Vec<&PulpServer> = existing
      .values()
      .filter(|server| !config.pulp_servers.contains_key(&server.name))
      .collect();
    for server in to_remove {
      Self::remove_server(server).await?;
    }

    Ok(())
  }

  /// Applies scalar updates, binding changes, and schedules for one
  /// backend.
  async fn apply_server(
    config: &SyncConfigFile,
    server: &PulpServer,
    server_config: &PulpServerConfig,
    group_ids: &HashMap<String, MongoId>,
    server_ids: &HashMap<String, MongoId>,
  ) -> anyhow::Result<()> {
    let db = db_client();
    let now = pulp_manager_timestamp();
    let credentials = &config.credentials[&server_config.credentials];

    let fields = ServerFields::from_config(server_config, credentials);
    if fields.differs_from(server) {
      info!("making updates for {}", server.name);
      update_one_by_id(
        &db.pulp_servers,
        &server.id,
        Update::Set(doc! {
          "username": &fields.username,
          "vault_service_account_mount":
            to_bson(&fields.vault_service_account_mount)?,
          "snapshot_supported": fields.snapshot_supported,
          "max_concurrent_snapshots":
            to_bson(&fields.max_concurrent_snapshots)?,
          "repo_config_registration_schedule":
            to_bson(&fields.repo_config_registration_schedule)?,
          "repo_config_registration_max_runtime":
            to_bson(&fields.repo_config_registration_max_runtime)?,
          "repo_config_registration_regex_include":
            to_bson(&fields.repo_config_registration_regex_include)?,
          "repo_config_registration_regex_exclude":
            to_bson(&fields.repo_config_registration_regex_exclude)?,
          "date_last_updated": now,
        }),
        None,
      )
      .await
      .context("failed to update pulp server")?;
    }

    let existing_bindings = find_collect(
      &db.pulp_server_repo_groups,
      doc! { "pulp_server_id": &server.id },
      None,
    )
    .await
    .context("failed to query pulp server repo groups")?;

    let plan = plan_bindings(
      &existing_bindings,
      &server_config.repo_groups,
      group_ids,
      server_ids,
    );

    for spec in &plan.to_add {
      let binding = PulpServerRepoGroup {
        id: String::new(),
        pulp_server_id: server.id.clone(),
        repo_group_id: spec.repo_group_id.clone(),
        repo_group_name: spec.repo_group_name.clone(),
        schedule: spec.schedule.clone(),
        max_concurrent_syncs: spec.max_concurrent_syncs,
        max_runtime: spec.max_runtime.clone(),
        pulp_master_id: spec.pulp_master_id.clone(),
        date_created: now,
        date_last_updated: now,
      };
      db.pulp_server_repo_groups
        .insert_one(&binding)
        .await
        .context("failed to insert pulp server repo group")?;
    }

    for (id, spec) in &plan.to_update {
      update_one_by_id(
        &db.pulp_server_repo_groups,
        id,
        Update::Set(doc! {
          "repo_group_id": &spec.repo_group_id,
          "repo_group_name": &spec.repo_group_name,
          "schedule": to_bson(&spec.schedule)?,
          "max_concurrent_syncs": spec.max_concurrent_syncs as i32,
          "max_runtime": &spec.max_runtime,
          "pulp_master_id": to_bson(&spec.pulp_master_id)?,
          "date_last_updated": now,
        }),
        None,
      )
      .await
      .context("failed to update pulp server repo group")?;
    }

    for binding in &plan.to_remove {
      db.pulp_server_repo_groups
        .delete_one(doc! { "_id": ObjectId::parse_str(&binding.id)? })
        .await
        .context("failed to remove pulp server repo group")?;
    }

    Self::reconcile_schedules(config, server, server_config, &plan)
      .await?;

    Ok(())
  }

  /// Registers / replaces / removes the cron jobs for one backend's
  /// bindings and its repo config registration.
  async fn reconcile_schedules(
    config: &SyncConfigFile,
    server: &PulpServer,
    server_config: &PulpServerConfig,
    plan: &BindingPlan,
  ) -> anyhow::Result<()> {
    let queue = queue_client();

    for (group_name, group_config) in &server_config.repo_groups {
      let job_id = sync_schedule_job_id(&server.name, group_name);
      let Some(schedule) = &group_config.schedule else {
        queue.deschedule(DEFAULT_QUEUE, &job_id).await?;
        continue;
      };
      let repo_group = &config.repo_groups[group_name];
      let timeout =
        parse_duration(&group_config.max_runtime)?.as_secs();
      let args = json!({
        "name": server.name,
        "max_concurrent_syncs": group_config.max_concurrent_syncs,
        "regex_include": repo_group.regex_include,
        "regex_exclude": repo_group.regex_exclude,
        "source_pulp_server_name": group_config.pulp_master,
        "sync_options": null,
        "max_runtime": group_config.max_runtime,
      });
      debug!(
        "registering sync schedule {job_id} with cron {schedule}"
      );
      queue
        .schedule_cron(
          DEFAULT_QUEUE,
          schedule,
          JobKind::SyncRepos,
          args,
          &job_id,
          Some(timeout),
        )
        .await
        .with_context(|| {
          format!("failed to register schedule {job_id}")
        })?;
    }

    for binding in &plan.to_remove {
      let job_id =
        sync_schedule_job_id(&server.name, &binding.repo_group_name);
      queue.deschedule(DEFAULT_QUEUE, &job_id).await?;
    }

    let registration_id = registration_schedule_job_id(&server.name);
    match &server_config.repo_config_registration {
      Some(registration) => {
        let timeout =
          parse_duration(&registration.max_runtime)?.as_secs();
        let args = json!({
          "name": server.name,
          "regex_include": registration.regex_include,
          "regex_exclude": registration.regex_exclude,
          "max_runtime": registration.max_runtime,
        });
        queue
          .schedule_cron(
            DEFAULT_QUEUE,
            &registration.schedule,
            JobKind::RegisterRepoConfigs,
            args,
            &registration_id,
            Some(timeout),
          )
          .await
          .with_context(|| {
            format!("failed to register schedule {registration_id}")
          })?;
      }
      None => {
        queue.deschedule(DEFAULT_QUEUE, &registration_id).await?;
      }
    }

    Ok(())
  }

  /// Removes a backend no longer present in config, cascading its
  /// bindings, repos, task links and schedules.
  async fn remove_server(server: &PulpServer) -> anyhow::Result<()> {
    info!("removing pulp server {} from the db", server.name);
    let db = db_client();
    let queue = queue_client();

    let bindings = find_collect(
      &db.pulp_server_repo_groups,
      doc! { "pulp_server_id": &server.id },
      None,
    )
    .await
    .context("failed to query pulp server repo groups")?;
    for binding in &bindings {
      let job_id =
        sync_schedule_job_id(&server.name, &binding.repo_group_name);
      queue.deschedule(DEFAULT_QUEUE, &job_id).await?;
    }
    queue
      .deschedule(
        DEFAULT_QUEUE,
        &registration_schedule_job_id(&server.name),
      )
      .await?;

    db.pulp_server_repo_groups
      .delete_many(doc! { "pulp_server_id": &server.id })
      .await
      .context("failed to remove pulp server repo groups")?;

    let repos = find_collect(
      &db.pulp_server_repos,
      doc! { "pulp_server_id": &server.id },
      None,
    )
    .await
    .context("failed to query pulp server repos")?;
    for repo in &repos {
      db.pulp_server_repo_tasks
        .delete_many(doc! { "pulp_server_repo_id": &repo.id })
        .await
        .context("failed to remove repo task links")?;
    }
    db.pulp_server_repos
      .delete_many(doc! { "pulp_server_id": &server.id })
      .await
      .context("failed to remove pulp server repos")?;

    db.pulp_servers
      .delete_one(doc! { "_id": ObjectId::parse_str(&server.id)? })
      .await
      .context("failed to remove pulp server")?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
pulp_servers:
  pulp01.example.com:
    credentials: pulp-svc
    repo_groups:
      external:
        schedule: "0 2 * * *"
        max_concurrent_syncs: 2
        max_runtime: 4h
    snapshot_support:
      max_concurrent_snapshots: 3
  pulp02.example.com:
    credentials: pulp-svc
    repo_groups:
      external:
        max_concurrent_syncs: 2
        max_runtime: 4h
        pulp_master: pulp01.example.com
credentials:
  pulp-svc:
    username: svc_pulp
    vault_service_account_mount: service-accounts
repo_groups:
  external:
    regex_include: "^ext-"
"#;

  fn parse(yaml: &str) -> SyncConfigFile {
    serde_yaml_ng::from_str(yaml).unwrap()
  }

  #[test]
  fn sample_config_validates() {
    let config = parse(SAMPLE);
    validate_config(&config).unwrap();
    let server = &config.pulp_servers["pulp01.example.com"];
    assert_eq!(
      server.repo_groups["external"].schedule.as_deref(),
      Some("0 2 * * *")
    );
    assert_eq!(
      server
        .snapshot_support
        .as_ref()
        .unwrap()
        .max_concurrent_snapshots,
      3
    );
  }

  #[test]
  fn unresolved_references_collected_together() {
    let config = parse(
      r#"
pulp_servers:
  pulp01.example.com:
    credentials: missing-creds
    repo_groups:
      unknown-group:
        max_concurrent_syncs: 1
        max_runtime: 1h
        pulp_master: nowhere.example.com
credentials:
  pulp-svc:
    username: svc_pulp
    vault_service_account_mount: service-accounts
repo_groups:
  external: {}
"#,
    );
    let error = validate_config(&config).unwrap_err().to_string();
    assert!(error.contains("missing-creds"), "{error}");
    assert!(error.contains("unknown-group"), "{error}");
    assert!(error.contains("pulp master nowhere.example.com"), "{error}");
  }

  #[test]
  fn credentials_need_a_secret_source() {
    let config = parse(
      r#"
pulp_servers: {}
credentials:
  pulp-svc:
    username: svc_pulp
repo_groups: {}
"#,
    );
    assert!(validate_config(&config).is_err());
  }

  fn group(name: &str, include: Option<&str>) -> RepoGroup {
    RepoGroup {
      id: format!("{name}-id"),
      name: name.to_string(),
      regex_include: include.map(str::to_string),
      regex_exclude: None,
      date_created: 0,
      date_last_updated: 0,
    }
  }

  #[test]
  fn repo_group_plan_add_update_remove() {
    let existing =
      vec![group("external", Some("^ext-")), group("legacy", None)];
    let configured = parse(SAMPLE).repo_groups;

    let plan = plan_repo_groups(&existing, &configured);
    assert!(plan.to_add.is_empty());
    assert!(plan.to_update.is_empty());
    assert_eq!(plan.to_remove.len(), 1);
    assert_eq!(plan.to_remove[0].name, "legacy");

    // Changing a regex turns into an update.
    let existing = vec![group("external", Some("^external-"))];
    let plan = plan_repo_groups(&existing, &configured);
    assert_eq!(plan.to_update.len(), 1);

    // A fresh database adds everything.
    let plan = plan_repo_groups(&[], &configured);
    assert_eq!(plan.to_add.len(), 1);
  }

  #[test]
  fn repo_group_plan_is_idempotent() {
    let configured = parse(SAMPLE).repo_groups;
    let existing = vec![group("external", Some("^ext-"))];
    let plan = plan_repo_groups(&existing, &configured);
    assert!(plan.is_empty());
  }

  #[test]
  fn binding_plan_resolves_master_and_detects_drift() {
    let config = parse(SAMPLE);
    let group_ids = HashMap::from([(
      "external".to_string(),
      "external-id".to_string(),
    )]);
    let server_ids = HashMap::from([
      ("pulp01.example.com".to_string(), "p1-id".to_string()),
      ("pulp02.example.com".to_string(), "p2-id".to_string()),
    ]);

    let configured =
      &config.pulp_servers["pulp02.example.com"].repo_groups;
    let plan =
      plan_bindings(&[], configured, &group_ids, &server_ids);
    assert_eq!(plan.to_add.len(), 1);
    assert_eq!(
      plan.to_add[0].pulp_master_id.as_deref(),
      Some("p1-id")
    );

    // Re-planning against the applied state is a no-op.
    let now = 0;
    let applied = vec![PulpServerRepoGroup {
      id: "binding-id".to_string(),
      pulp_server_id: "p2-id".to_string(),
      repo_group_id: "external-id".to_string(),
      repo_group_name: "external".to_string(),
      schedule: None,
      max_concurrent_syncs: 2,
      max_runtime: "4h".to_string(),
      pulp_master_id: Some("p1-id".to_string()),
      date_created: now,
      date_last_updated: now,
    }];
    let plan =
      plan_bindings(&applied, configured, &group_ids, &server_ids);
    assert!(plan.is_empty());

    // Dropping the group from config removes the binding.
    let plan = plan_bindings(
      &applied,
      &BTreeMap::new(),
      &group_ids,
      &server_ids,
    );
    assert_eq!(plan.to_remove.len(), 1);
  }

  #[test]
  fn schedule_job_ids_are_stable() {
    assert_eq!(
      sync_schedule_job_id("pulp01.example.com", "external"),
      "repo_sync_pulp01.example.com_external"
    );
    assert_eq!(
      registration_schedule_job_id("pulp01.example.com"),
      "repo_config_registration_pulp01.example.com"
    );
  }
}
