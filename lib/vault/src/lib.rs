//! Minimal HashiCorp Vault client, aimed at the vault-agent sidecar.
//! Service-account passwords live at `<mount>/creds/<username>` with the
//! live value in the `current_password` field.

use serde_json::Value;

pub const DEFAULT_VAULT_AGENT_ADDR: &str = "http://127.0.0.1:8200";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
  #[error("vault request to {url} failed: {source}")]
  Request {
    url: String,
    source: reqwest::Error,
  },
  #[error("vault returned {status} for {url}")]
  Status {
    url: String,
    status: reqwest::StatusCode,
  },
  #[error("secret at {path} has no '{field}' field")]
  MissingField { path: String, field: String },
}

#[derive(Clone)]
pub struct HashiVaultClient {
  address: String,
  http: reqwest::Client,
}

impl HashiVaultClient {
  /// `address` defaults to the local vault agent when empty. Talking to the
  /// agent needs no token; it injects auth itself.
  pub fn new(address: impl Into<String>) -> HashiVaultClient {
    let address = address.into();
    let address = if address.is_empty() {
      DEFAULT_VAULT_AGENT_ADDR.to_string()
    } else {
      address.trim_end_matches('/').to_string()
    };
    HashiVaultClient {
      address,
      http: reqwest::Client::new(),
    }
  }

  async fn read_secret(&self, path: &str) -> Result<Value, VaultError> {
    let url = format!("{}/v1/{path}", self.address);
    let response = self
      .http
      .get(&url)
      .send()
      .await
      .map_err(|source| VaultError::Request {
        url: url.clone(),
        source,
      })?;
    if !response.status().is_success() {
      return Err(VaultError::Status {
        url,
        status: response.status(),
      });
    }
    response
      .json()
      .await
      .map_err(|source| VaultError::Request { url, source })
  }

  /// Reads the current password of a service account from the given mount.
  pub async fn get_svc_account_password(
    &self,
    username: &str,
    mount: &str,
  ) -> Result<String, VaultError> {
    let path = format!("{mount}/creds/{username}");
    let secret = self.read_secret(&path).await?;
    // kv2 nests the payload under data.data, kv1 puts it under data
    let data = &secret["data"];
    let password = data["data"]["current_password"]
      .as_str()
      .or_else(|| data["current_password"].as_str());
    match password {
      Some(password) => Ok(password.to_string()),
      None => Err(VaultError::MissingField {
        path,
        field: "current_password".to_string(),
      }),
    }
  }
}
