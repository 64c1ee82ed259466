use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use job_queue::QueueClient;

use crate::{auth::jwt::JwtClient, config::core_config};

static DB_CLIENT: OnceLock<database::Client> = OnceLock::new();

pub fn db_client() -> &'static database::Client {
  DB_CLIENT.get().unwrap_or_else(|| {
    error!(
      "FATAL: db_client accessed before initialized | Ensure init_db_client() is called during startup | Exiting..."
    );
    std::process::exit(1)
  })
}

/// Must be called in app startup sequence.
pub async fn init_db_client() {
  let init = async {
    let client = database::Client::new(&core_config().database)
      .await
      .context("failed to initialize database client")?;
    DB_CLIENT.set(client).map_err(|_| {
      anyhow!(
        "db_client initialized more than once - this should not happen"
      )
    })?;
    anyhow::Ok(())
  }
  .await;
  if let Err(e) = init {
    error!(
      "FATAL: Failed to initialize database::Client | {e:#} | Exiting..."
    );
    std::process::exit(1)
  }
}

static QUEUE_CLIENT: OnceLock<QueueClient> = OnceLock::new();

pub fn queue_client() -> &'static QueueClient {
  QUEUE_CLIENT.get().unwrap_or_else(|| {
    error!(
      "FATAL: queue_client accessed before initialized | Ensure init_queue_client() is called during startup | Exiting..."
    );
    std::process::exit(1)
  })
}

/// Must be called in app startup sequence.
pub async fn init_queue_client() {
  let init = async {
    let client = QueueClient::new(&core_config().redis.url())
      .await
      .context("failed to initialize job queue client")?;
    QUEUE_CLIENT.set(client).map_err(|_| {
      anyhow!(
        "queue_client initialized more than once - this should not happen"
      )
    })?;
    anyhow::Ok(())
  }
  .await;
  if let Err(e) = init {
    error!(
      "FATAL: Failed to initialize job_queue::QueueClient | {e:#} | Exiting..."
    );
    std::process::exit(1)
  }
}

pub fn jwt_client() -> &'static JwtClient {
  static JWT_CLIENT: OnceLock<JwtClient> = OnceLock::new();
  JWT_CLIENT.get_or_init(|| match JwtClient::new(core_config()) {
    Ok(client) => client,
    Err(e) => {
      error!(
        "FATAL: Failed to initialize JwtClient | {e:#} | Exiting..."
      );
      std::process::exit(1)
    }
  })
}
