//! Mongo-backed entity store for Pulp Manager. Holds the typed collection
//! set, ensures indexes on startup, and provides the universal filter /
//! paging grammar used by the control-plane list endpoints.

use anyhow::Context;
use mungos::mongodb::{
  Collection, Database, IndexModel,
  bson::doc,
  options::{ClientOptions, IndexOptions},
};
use pulp_manager_client::entities::{
  repo::{Repo, RepoGroup},
  server::{
    PulpServer, PulpServerRepo, PulpServerRepoGroup, PulpServerRepoTask,
  },
  task::{Task, TaskStage},
};
use serde::Deserialize;

pub use mungos;

pub mod filter;
pub mod paged;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  /// Full connection string. Takes precedence over the field-wise config.
  #[serde(default)]
  pub uri: String,
  #[serde(default = "default_address")]
  pub address: String,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub password: String,
  #[serde(default = "default_app_name")]
  pub app_name: String,
  #[serde(default = "default_db_name")]
  pub db_name: String,
}

fn default_address() -> String {
  String::from("localhost:27017")
}

fn default_app_name() -> String {
  String::from("pulp_manager")
}

fn default_db_name() -> String {
  String::from("pulp_manager")
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    DatabaseConfig {
      uri: Default::default(),
      address: default_address(),
      username: Default::default(),
      password: Default::default(),
      app_name: default_app_name(),
      db_name: default_db_name(),
    }
  }
}

pub struct Client {
  pub db: Database,
  pub pulp_servers: Collection<PulpServer>,
  pub repos: Collection<Repo>,
  pub repo_groups: Collection<RepoGroup>,
  pub pulp_server_repo_groups: Collection<PulpServerRepoGroup>,
  pub pulp_server_repos: Collection<PulpServerRepo>,
  pub pulp_server_repo_tasks: Collection<PulpServerRepoTask>,
  pub tasks: Collection<Task>,
  pub task_stages: Collection<TaskStage>,
}

impl Client {
  pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Client> {
    let uri = if !config.uri.is_empty() {
      config.uri.clone()
    } else if !config.username.is_empty() {
      format!(
        "mongodb://{}:{}@{}",
        config.username, config.password, config.address
      )
    } else {
      format!("mongodb://{}", config.address)
    };

    let mut options = ClientOptions::parse(&uri)
      .await
      .context("failed to parse database address")?;
    options.app_name = Some(config.app_name.clone());

    let mongo = mungos::mongodb::Client::with_options(options)
      .context("failed to initialize database client")?;
    let db = mongo.database(&config.db_name);

    let client = Client {
      pulp_servers: db.collection("pulp_servers"),
      repos: db.collection("repos"),
      repo_groups: db.collection("repo_groups"),
      pulp_server_repo_groups: db.collection("pulp_server_repo_groups"),
      pulp_server_repos: db.collection("pulp_server_repos"),
      pulp_server_repo_tasks: db.collection("pulp_server_repo_tasks"),
      tasks: db.collection("tasks"),
      task_stages: db.collection("task_stages"),
      db,
    };

    client
      .init_indexes()
      .await
      .context("failed to initialize database indexes")?;

    Ok(client)
  }

  async fn init_indexes(&self) -> anyhow::Result<()> {
    self
      .pulp_servers
      .create_index(unique_index(doc! { "name": 1 }))
      .await?;

    self
      .repos
      .create_index(unique_index(doc! { "name": 1 }))
      .await?;

    self
      .repo_groups
      .create_index(unique_index(doc! { "name": 1 }))
      .await?;

    self
      .pulp_server_repo_groups
      .create_index(unique_index(
        doc! { "pulp_server_id": 1, "repo_group_id": 1 },
      ))
      .await?;

    self
      .pulp_server_repos
      .create_index(unique_index(doc! { "pulp_server_id": 1, "repo_id": 1 }))
      .await?;
    self
      .pulp_server_repos
      .create_index(index(doc! { "pulp_server_name": 1, "repo_name": 1 }))
      .await?;

    self
      .pulp_server_repo_tasks
      .create_index(unique_index(
        doc! { "pulp_server_repo_id": 1, "task_id": 1 },
      ))
      .await?;
    self
      .pulp_server_repo_tasks
      .create_index(index(
        doc! { "pulp_server_repo_id": 1, "date_created": -1 },
      ))
      .await?;

    for keys in [
      doc! { "state": 1 },
      doc! { "task_type": 1 },
      doc! { "parent_task_id": 1 },
      doc! { "worker_job_id": 1 },
      doc! { "date_queued": -1 },
      doc! { "date_finished": -1 },
    ] {
      self.tasks.create_index(index(keys)).await?;
    }

    self
      .task_stages
      .create_index(index(doc! { "task_id": 1, "date_created": 1 }))
      .await?;

    Ok(())
  }
}

fn index(keys: mungos::mongodb::bson::Document) -> IndexModel {
  IndexModel::builder().keys(keys).build()
}

fn unique_index(keys: mungos::mongodb::bson::Document) -> IndexModel {
  IndexModel::builder()
    .keys(keys)
    .options(IndexOptions::builder().unique(true).build())
    .build()
}
