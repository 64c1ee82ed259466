/// Error kinds the controllers raise. Handlers downcast these out of the
/// anyhow chain to pick a response status.
#[derive(Debug, thiserror::Error)]
pub enum PulpManagerError {
  #[error("{0}")]
  EntityNotFound(String),
  #[error("{0}")]
  TaskNotFound(String),
  #[error("{0}")]
  InvalidTaskState(String),
  #[error("{0}")]
  ValueError(String),
  #[error("{0}")]
  SnapshotError(String),
  #[error("{0}")]
  ConfigError(String),
  #[error("backend task failed: {0}")]
  PulpTaskError(String),
}
