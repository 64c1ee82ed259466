use std::{path::PathBuf, sync::OnceLock};

use anyhow::Context;
use database::DatabaseConfig;
use pulp_manager_client::entities::logger::LogConfig;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

/// Environment surface. `DB_*` are required; the rest fall back to the
/// config file or defaults.
#[derive(Deserialize)]
pub struct Env {
  pub db_hostname: Option<String>,
  pub db_name: Option<String>,
  pub db_user: Option<String>,
  pub db_password: Option<String>,
  pub jwt_secret: Option<String>,
  /// TOML config file with the redis / auth / pulp / paging sections.
  pub pulp_manager_config_path: Option<PathBuf>,
  /// YAML file declaring backends, credentials and repo groups.
  pub pulp_sync_config_path: Option<PathBuf>,
  pub pulp_manager_skip_parser_config: Option<String>,
}

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pulp_manager/config.toml";
pub const DEFAULT_SYNC_CONFIG_PATH: &str =
  "/etc/pulp_manager/pulp_config.yml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub redis: RedisConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub pulp: PulpConfig,
  #[serde(default)]
  pub paging: PagingConfig,
  #[serde(default)]
  pub vault: VaultConfig,
  #[serde(default)]
  pub metrics: MetricsConfig,
  #[serde(default)]
  pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_bind_ip")]
  pub bind_ip: String,
  #[serde(default = "default_api_port")]
  pub port: u16,
}

fn default_bind_ip() -> String {
  String::from("0.0.0.0")
}

fn default_api_port() -> u16 {
  8080
}

impl Default for ApiConfig {
  fn default() -> Self {
    ApiConfig {
      bind_ip: default_bind_ip(),
      port: default_api_port(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
  #[serde(default = "default_redis_host")]
  pub host: String,
  #[serde(default = "default_redis_port")]
  pub port: u16,
  #[serde(default)]
  pub db: u8,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: u64,
}

fn default_redis_host() -> String {
  String::from("localhost")
}

fn default_redis_port() -> u16 {
  6379
}

impl Default for RedisConfig {
  fn default() -> Self {
    RedisConfig {
      host: default_redis_host(),
      port: default_redis_port(),
      db: 0,
      max_page_size: default_max_page_size(),
    }
  }
}

impl RedisConfig {
  pub fn url(&self) -> String {
    format!("redis://{}:{}/{}", self.host, self.port, self.db)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  /// `local` checks credentials against `[auth] users`; the LDAP bind
  /// itself lives outside this service.
  #[serde(default = "default_auth_method")]
  pub method: String,
  /// Groups whose members may call mutating endpoints.
  #[serde(default)]
  pub admin_groups: Vec<String>,
  #[serde(default = "default_jwt_token_lifetime_mins")]
  pub jwt_token_lifetime_mins: u64,
  #[serde(default)]
  pub users: Vec<LocalUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalUser {
  pub username: String,
  /// bcrypt hash; a plaintext `password` is accepted for dev setups.
  #[serde(default)]
  pub password_hash: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default)]
  pub groups: Vec<String>,
}

fn default_auth_method() -> String {
  String::from("local")
}

fn default_jwt_token_lifetime_mins() -> u64 {
  60
}

impl Default for AuthConfig {
  fn default() -> Self {
    AuthConfig {
      method: default_auth_method(),
      admin_groups: Vec::new(),
      jwt_token_lifetime_mins: default_jwt_token_lifetime_mins(),
      users: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PulpConfig {
  /// Packages matching this are stripped from externally-fed repos before
  /// publication.
  #[serde(default)]
  pub banned_package_regex: String,
  /// Comma separated domain substrings treated as internal feeds.
  #[serde(default)]
  pub internal_domains: String,
  /// Service account password used instead of vault in local mode.
  #[serde(default)]
  pub password: String,
  #[serde(default = "default_poll_interval_sec")]
  pub poll_interval_sec: u64,
  #[serde(default = "default_max_wait_count")]
  pub max_wait_count: u32,
  /// Fallback task runtime bound for the stuck-task reaper.
  #[serde(default = "default_max_runtime")]
  pub default_max_runtime: String,
  #[serde(default = "default_reaper_grace_sec")]
  pub reaper_grace_sec: u64,
}

fn default_poll_interval_sec() -> u64 {
  10
}

fn default_max_wait_count() -> u32 {
  200
}

fn default_max_runtime() -> String {
  String::from("24h")
}

fn default_reaper_grace_sec() -> u64 {
  300
}

impl Default for PulpConfig {
  fn default() -> Self {
    PulpConfig {
      banned_package_regex: String::new(),
      internal_domains: String::new(),
      password: String::new(),
      poll_interval_sec: default_poll_interval_sec(),
      max_wait_count: default_max_wait_count(),
      default_max_runtime: default_max_runtime(),
      reaper_grace_sec: default_reaper_grace_sec(),
    }
  }
}

impl PulpConfig {
  pub fn internal_domain_list(&self) -> Vec<&str> {
    self
      .internal_domains
      .split(',')
      .map(str::trim)
      .filter(|domain| !domain.is_empty())
      .collect()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
  #[serde(default = "default_page_size")]
  pub default_page_size: u64,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: u64,
}

fn default_page_size() -> u64 {
  20
}

fn default_max_page_size() -> u64 {
  100
}

impl Default for PagingConfig {
  fn default() -> Self {
    PagingConfig {
      default_page_size: default_page_size(),
      max_page_size: default_max_page_size(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VaultConfig {
  /// Empty means the local vault agent.
  #[serde(default)]
  pub vault_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  #[serde(default = "default_metrics_port")]
  pub port: u16,
}

fn default_metrics_port() -> u16 {
  9300
}

impl Default for MetricsConfig {
  fn default() -> Self {
    MetricsConfig {
      port: default_metrics_port(),
    }
  }
}

#[derive(Debug)]
pub struct CoreConfig {
  pub api: ApiConfig,
  pub redis: RedisConfig,
  pub auth: AuthConfig,
  pub pulp: PulpConfig,
  pub paging: PagingConfig,
  pub vault: VaultConfig,
  pub metrics: MetricsConfig,
  pub logging: LogConfig,
  pub database: DatabaseConfig,
  pub jwt_secret: String,
  pub sync_config_path: PathBuf,
  pub skip_parser_config: bool,
  /// `Is_local=true` bypasses vault and https towards the backends.
  pub is_local: bool,
}

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| match load_core_config() {
    Ok(config) => config,
    Err(e) => {
      panic!("Failed to load Pulp Manager config | {e:#}");
    }
  })
}

fn load_core_config() -> anyhow::Result<CoreConfig> {
  let env: Env = envy::from_env()
    .context("Failed to parse Pulp Manager environment")?;

  let mut missing_env_vars = Vec::new();
  for (name, value) in [
    ("DB_HOSTNAME", &env.db_hostname),
    ("DB_NAME", &env.db_name),
    ("DB_USER", &env.db_user),
    ("DB_PASSWORD", &env.db_password),
  ] {
    if value.is_none() {
      missing_env_vars.push(name);
    }
  }
  if !missing_env_vars.is_empty() {
    anyhow::bail!(
      "The following environment variables are missing for the db \
       connection: {}",
      missing_env_vars.join(", ")
    );
  }

  let config_path = env
    .pulp_manager_config_path
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
  let file: FileConfig = if config_path.is_file() {
    let contents = std::fs::read_to_string(&config_path)
      .with_context(|| {
        format!("Failed to read config file at {config_path:?}")
      })?;
    toml::from_str(&contents).with_context(|| {
      format!("Failed to parse config file at {config_path:?}")
    })?
  } else {
    FileConfig::default()
  };

  let jwt_secret = env.jwt_secret.unwrap_or_default();
  if jwt_secret.is_empty() && file.auth.method != "none" {
    anyhow::bail!("JWT_SECRET must be set when auth is enabled");
  }

  Ok(CoreConfig {
    database: DatabaseConfig {
      uri: String::new(),
      address: env.db_hostname.unwrap(),
      username: env.db_user.unwrap(),
      password: env.db_password.unwrap(),
      app_name: String::from("pulp_manager"),
      db_name: env.db_name.unwrap(),
    },
    jwt_secret,
    sync_config_path: env
      .pulp_sync_config_path
      .unwrap_or_else(|| PathBuf::from(DEFAULT_SYNC_CONFIG_PATH)),
    skip_parser_config: env.pulp_manager_skip_parser_config.is_some(),
    // The flag predates the service's env conventions, so the exact
    // mixed-case name is read directly.
    is_local: std::env::var("Is_local")
      .map(|value| value.to_lowercase() == "true")
      .unwrap_or(false),
    api: file.api,
    redis: file.redis,
    auth: file.auth,
    pulp: file.pulp,
    paging: file.paging,
    vault: file.vault,
    metrics: file.metrics,
    logging: file.logging,
  })
}

pub fn cors_layer() -> CorsLayer {
  CorsLayer::new()
    .allow_origin(tower_http::cors::Any)
    .allow_methods(tower_http::cors::Any)
    .allow_headers(tower_http::cors::Any)
}
