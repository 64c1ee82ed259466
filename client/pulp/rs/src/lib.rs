//! Client for the Pulp 3 REST API (`/pulp/api/v3/`).
//!
//! Every mutating call on a backend returns an asynchronous task; the
//! operation modules hand back [resources::PulpTask] values that callers
//! poll with [tasks::get_task] or drive to completion with
//! [tasks::monitor_task].

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

pub mod content;
pub mod distributions;
pub mod publications;
pub mod remotes;
pub mod repositories;
pub mod resources;
pub mod signing_services;
pub mod tasks;

const API_ROOT: &str = "/pulp/api/v3";
/// Error bodies are truncated to this many bytes before being recorded.
const MAX_ERROR_BODY: usize = 1024;
const GENERIC_FAILURE_MAX_RETRIES: u32 = 3;
const AUTH_FAILURE_MAX_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum Pulp3Error {
  #[error("problem calling {method} {url}, status: {status}, body: {body}")]
  Api {
    method: String,
    url: String,
    status: u16,
    body: String,
  },
  #[error("request error calling {method} {url}: {source}")]
  Request {
    method: String,
    url: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("failed to decode response from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to refresh credentials for {username}: {detail}")]
  Credentials { username: String, detail: String },
  #[error("href is not valid for a {expected}: {href}")]
  InvalidHref {
    expected: &'static str,
    href: String,
  },
  #[error("task {href} failed with errors: {error}")]
  TaskFailed { href: String, error: String },
  #[error(
    "task {href} failed to enter running state, \
     poll interval: {poll_interval_sec}, wait count: {max_wait_count}"
  )]
  TaskStuckWaiting {
    href: String,
    poll_interval_sec: u64,
    max_wait_count: u32,
  },
  #[error("{0}")]
  InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, Pulp3Error>;

/// Source of the API password. The vault-backed provider re-reads on every
/// unauthorized response; the static provider can only hand out the value
/// it was built with.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
  async fn password(&self, username: &str) -> anyhow::Result<String>;
  /// Whether a refresh can yield a different password. Controls the
  /// auth-retry budget.
  fn refreshable(&self) -> bool {
    true
  }
}

pub struct StaticCredentials(pub String);

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentials {
  async fn password(&self, _username: &str) -> anyhow::Result<String> {
    Ok(self.0.clone())
  }

  fn refreshable(&self) -> bool {
    false
  }
}

pub struct Pulp3Client {
  address: String,
  base_url: String,
  username: String,
  use_https: bool,
  password: Mutex<Option<String>>,
  credentials: Arc<dyn CredentialProvider>,
  auth_failure_max_retries: u32,
  http: reqwest::Client,
}

impl Pulp3Client {
  /// `address` is the backend host label, e.g. `pulp01.example.com`.
  pub fn new(
    address: impl Into<String>,
    username: impl Into<String>,
    credentials: Arc<dyn CredentialProvider>,
    use_https: bool,
  ) -> Pulp3Client {
    let address = address.into();
    let protocol = if use_https { "https" } else { "http" };
    Pulp3Client {
      base_url: format!("{protocol}://{address}{API_ROOT}"),
      auth_failure_max_retries: if credentials.refreshable() {
        AUTH_FAILURE_MAX_RETRIES
      } else {
        1
      },
      username: username.into(),
      password: Mutex::new(None),
      credentials,
      use_https,
      address,
      http: reqwest::Client::new(),
    }
  }

  pub fn address(&self) -> &str {
    &self.address
  }

  async fn current_password(&self) -> Result<String> {
    if let Some(password) = self.password.lock().unwrap().clone() {
      return Ok(password);
    }
    self.refresh_password().await
  }

  async fn refresh_password(&self) -> Result<String> {
    let password = self
      .credentials
      .password(&self.username)
      .await
      .map_err(|e| Pulp3Error::Credentials {
        username: self.username.clone(),
        detail: format!("{e:#}"),
      })?;
    *self.password.lock().unwrap() = Some(password.clone());
    Ok(password)
  }

  /// Builds the request URL for either call style: an API-relative href
  /// (with or without the `/pulp/api/v3` prefix), or an absolute URL the
  /// backend emitted earlier (e.g. a pagination `next` link). Absolute
  /// http:// URLs are upgraded when the client runs TLS, so credentials
  /// never go out unencrypted.
  fn url_for(&self, href: &str) -> String {
    if href.contains(&self.address) {
      if href.starts_with("http://") && self.use_https {
        return href.replacen("http://", "https://", 1);
      }
      return href.to_string();
    }
    let path = href.strip_prefix(API_ROOT).unwrap_or(href);
    format!("{}{}", self.base_url, path)
  }

  async fn request(
    &self,
    method: reqwest::Method,
    href: &str,
    params: Option<&[(String, String)]>,
    body: Option<&Value>,
  ) -> Result<Value> {
    let url = self.url_for(href);
    let mut auth_fail_retry_count = 0;
    let mut generic_fail_retry_count = 0;

    loop {
      let password = self.current_password().await?;
      let mut request = self
        .http
        .request(method.clone(), &url)
        .basic_auth(&self.username, Some(&password))
        .header(reqwest::header::ACCEPT, "application/json");
      if let Some(params) = params {
        request = request.query(params);
      }
      if let Some(body) = body {
        request = request.json(body);
      }

      let response =
        request.send().await.map_err(|source| Pulp3Error::Request {
          method: method.to_string(),
          url: url.clone(),
          source,
        })?;
      let status = response.status();

      if status == reqwest::StatusCode::UNAUTHORIZED
        && auth_fail_retry_count < self.auth_failure_max_retries
      {
        auth_fail_retry_count += 1;
        debug!(
          "unauthorized response from {url}, refreshing credentials \
           (attempt {auth_fail_retry_count})"
        );
        self.refresh_password().await?;
        continue;
      }

      if !matches!(status.as_u16(), 200 | 201 | 202 | 204) {
        generic_fail_retry_count += 1;
        if generic_fail_retry_count < GENERIC_FAILURE_MAX_RETRIES {
          continue;
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(MAX_ERROR_BODY);
        return Err(Pulp3Error::Api {
          method: method.to_string(),
          url,
          status: status.as_u16(),
          body,
        });
      }

      if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
      }

      let text =
        response.text().await.map_err(|source| Pulp3Error::Request {
          method: method.to_string(),
          url: url.clone(),
          source,
        })?;
      return serde_json::from_str(&text)
        .map_err(|source| Pulp3Error::Decode { url, source });
    }
  }

  pub async fn get(
    &self,
    href: &str,
    params: Option<&[(String, String)]>,
  ) -> Result<Value> {
    self.request(reqwest::Method::GET, href, params, None).await
  }

  /// GET that follows the `next` link until null, concatenating `results`.
  pub async fn get_page_results(
    &self,
    href: &str,
    params: Option<&[(String, String)]>,
  ) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut page = self.get(href, params).await?;
    loop {
      if let Some(results) = page
        .get_mut("results")
        .and_then(|results| results.as_array_mut())
      {
        items.append(results);
      }
      match page.get("next").and_then(|next| next.as_str()) {
        Some(next) => {
          let next = next.to_string();
          page = self.get(&next, None).await?;
        }
        None => return Ok(items),
      }
    }
  }

  pub async fn post(&self, href: &str, body: &Value) -> Result<Value> {
    self
      .request(reqwest::Method::POST, href, None, Some(body))
      .await
  }

  pub async fn put(&self, href: &str, body: &Value) -> Result<Value> {
    self
      .request(reqwest::Method::PUT, href, None, Some(body))
      .await
  }

  pub async fn patch(&self, href: &str, body: &Value) -> Result<Value> {
    self
      .request(reqwest::Method::PATCH, href, None, Some(body))
      .await
  }

  pub async fn delete(&self, href: &str) -> Result<Value> {
    self.request(reqwest::Method::DELETE, href, None, None).await
  }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
  href: &str,
  value: Value,
) -> Result<T> {
  serde_json::from_value(value).map_err(|source| Pulp3Error::Decode {
    url: href.to_string(),
    source,
  })
}

/// Extracts the `{"task": href}` payload mutating calls return.
pub(crate) fn task_href(href: &str, value: &Value) -> Result<String> {
  value
    .get("task")
    .and_then(|task| task.as_str())
    .map(str::to_string)
    .ok_or_else(|| Pulp3Error::Decode {
      url: href.to_string(),
      source: serde::de::Error::custom("response has no 'task' field"),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_client(use_https: bool) -> Pulp3Client {
    Pulp3Client::new(
      "pulp01.example.com",
      "svc_pulp",
      Arc::new(StaticCredentials("hunter2".to_string())),
      use_https,
    )
  }

  #[test]
  fn relative_hrefs_are_prefixed() {
    let client = test_client(true);
    assert_eq!(
      client.url_for("/repositories/rpm/rpm/"),
      "https://pulp01.example.com/pulp/api/v3/repositories/rpm/rpm/"
    );
    // The full API prefix is stripped rather than doubled.
    assert_eq!(
      client.url_for("/pulp/api/v3/repositories/rpm/rpm/abc/"),
      "https://pulp01.example.com/pulp/api/v3/repositories/rpm/rpm/abc/"
    );
  }

  #[test]
  fn absolute_next_links_are_upgraded_to_https() {
    let client = test_client(true);
    assert_eq!(
      client.url_for(
        "http://pulp01.example.com/pulp/api/v3/content/?page=2"
      ),
      "https://pulp01.example.com/pulp/api/v3/content/?page=2"
    );
  }

  #[test]
  fn absolute_links_kept_plain_without_tls() {
    let client = test_client(false);
    assert_eq!(
      client.url_for(
        "http://pulp01.example.com/pulp/api/v3/content/?page=2"
      ),
      "http://pulp01.example.com/pulp/api/v3/content/?page=2"
    );
  }
}
