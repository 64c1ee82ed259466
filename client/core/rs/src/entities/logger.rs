use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
  /// Minimum level to emit.
  #[serde(default)]
  pub level: LogLevel,
  /// How logs are written to stdio.
  #[serde(default)]
  pub stdio: StdioLogMode,
  /// Whether to use the multi-line pretty format.
  #[serde(default)]
  pub pretty: bool,
  /// Whether to include the emitting module in log lines.
  #[serde(default)]
  pub location: bool,
  #[serde(default = "default_ansi")]
  pub ansi: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    LogConfig {
      level: Default::default(),
      stdio: Default::default(),
      pretty: false,
      location: false,
      ansi: default_ansi(),
    }
  }
}

fn default_ansi() -> bool {
  true
}

#[derive(
  Debug, Clone, Copy, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(value: LogLevel) -> Self {
    match value {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

#[derive(
  Debug, Clone, Copy, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}
