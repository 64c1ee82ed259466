//! Wire types for the backend resources the orchestrator reads. Only the
//! fields the core consumes are modeled; everything else stays in the raw
//! JSON the operation modules hand back on request.

use pulp_manager_client::entities::repo::RepoKind;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Pulp3Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
  pub pulp_href: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub versions_href: Option<String>,
  #[serde(default)]
  pub latest_version_href: Option<String>,
  /// Href of the remote attached to this repository, if any.
  #[serde(default)]
  pub remote: Option<String>,
  #[serde(default)]
  pub retain_repo_versions: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryVersion {
  pub pulp_href: String,
  pub number: u64,
  pub repository: String,
  #[serde(default)]
  pub base_version: Option<String>,
  /// `{"present": {"<kind>.package": {"count": n, "href": …}, …}, …}`
  #[serde(default)]
  pub content_summary: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remote {
  pub pulp_href: String,
  pub name: String,
  pub url: String,
  #[serde(default)]
  pub policy: Option<String>,
  /// DEB remotes only: the release distributions synced from the upstream.
  #[serde(default)]
  pub distributions: Option<String>,
}

impl Remote {
  /// A DEB remote with `distributions == "/"` mirrors a flat repository,
  /// which has to be published with the flat-repo publisher.
  pub fn is_flat_repo(&self) -> bool {
    self.distributions.as_deref() == Some("/")
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
  pub pulp_href: String,
  pub name: String,
  pub base_path: String,
  #[serde(default)]
  pub base_url: Option<String>,
  #[serde(default)]
  pub repository: Option<String>,
  #[serde(default)]
  pub publication: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
  pub pulp_href: String,
  #[serde(default)]
  pub repository: Option<String>,
  #[serde(default)]
  pub repository_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningService {
  pub pulp_href: String,
  pub name: String,
  #[serde(default)]
  pub pubkey_fingerprint: Option<String>,
}

/// An asynchronous task on the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulpTask {
  pub pulp_href: String,
  #[serde(default)]
  pub pulp_created: Option<String>,
  /// waiting | running | completed | failed | canceled
  pub state: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub created_resources: Vec<String>,
  #[serde(default)]
  pub error: Option<Value>,
}

impl PulpTask {
  pub fn is_finished(&self) -> bool {
    !matches!(self.state.as_str(), "running" | "waiting")
  }

  pub fn completed(&self) -> bool {
    self.state == "completed"
  }
}

/// Request builder for a new publication. Exactly one of `repository` and
/// `repository_version` must be set; the backend rejects anything else, so
/// the builder does too, before a request goes out.
#[derive(Debug, Clone)]
pub struct NewPublication {
  pub kind: RepoKind,
  pub repository: Option<String>,
  pub repository_version: Option<String>,
  /// Publisher options merged into the request body.
  pub options: Value,
}

impl NewPublication {
  /// Publication of a repository version with the publisher defaults used
  /// across the fleet: SHA-256 checksums and no sqlite metadata for RPM,
  /// flat vs structured publishing for DEB chosen from the source remote.
  pub fn for_version(
    kind: RepoKind,
    repository_version: impl Into<String>,
    flat_deb_repo: bool,
  ) -> NewPublication {
    let options = match kind {
      RepoKind::Rpm => json!({
        "metadata_checksum_type": "sha256",
        "package_checksum_type": "sha256",
        "sqlite_metadata": false,
      }),
      RepoKind::Deb if flat_deb_repo => {
        json!({ "simple": true, "structured": false })
      }
      RepoKind::Deb => json!({ "simple": false, "structured": true }),
      _ => json!({}),
    };
    NewPublication {
      kind,
      repository: None,
      repository_version: Some(repository_version.into()),
      options,
    }
  }

  pub fn body(&self) -> Result<Value> {
    let mut body = match (&self.repository, &self.repository_version) {
      (Some(repository), None) => json!({ "repository": repository }),
      (None, Some(version)) => json!({ "repository_version": version }),
      (Some(_), Some(_)) => {
        return Err(Pulp3Error::InvalidRequest(
          "publication cannot set both repository and repository_version"
            .to_string(),
        ));
      }
      (None, None) => {
        return Err(Pulp3Error::InvalidRequest(
          "publication requires repository or repository_version"
            .to_string(),
        ));
      }
    };
    if let (Some(body), Some(options)) =
      (body.as_object_mut(), self.options.as_object())
    {
      for (key, value) in options {
        body.insert(key.clone(), value.clone());
      }
    }
    Ok(body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flat_repo_detection() {
    let mut remote = Remote {
      pulp_href: "/pulp/api/v3/remotes/deb/apt/1/".to_string(),
      name: "ext-foo".to_string(),
      url: "https://upstream/foo".to_string(),
      policy: None,
      distributions: Some("/".to_string()),
    };
    assert!(remote.is_flat_repo());
    remote.distributions = Some("stable".to_string());
    assert!(!remote.is_flat_repo());
  }

  #[test]
  fn publication_body_is_exclusive() {
    let both = NewPublication {
      kind: RepoKind::Rpm,
      repository: Some("/pulp/api/v3/repositories/rpm/rpm/1/".into()),
      repository_version: Some(
        "/pulp/api/v3/repositories/rpm/rpm/1/versions/2/".into(),
      ),
      options: json!({}),
    };
    assert!(both.body().is_err());

    let neither = NewPublication {
      kind: RepoKind::Rpm,
      repository: None,
      repository_version: None,
      options: json!({}),
    };
    assert!(neither.body().is_err());
  }

  #[test]
  fn rpm_publication_defaults() {
    let publication = NewPublication::for_version(
      RepoKind::Rpm,
      "/pulp/api/v3/repositories/rpm/rpm/1/versions/2/",
      false,
    );
    let body = publication.body().unwrap();
    assert_eq!(body["package_checksum_type"], "sha256");
    assert_eq!(body["sqlite_metadata"], false);
    assert_eq!(
      body["repository_version"],
      "/pulp/api/v3/repositories/rpm/rpm/1/versions/2/"
    );
  }

  #[test]
  fn deb_publication_flat_vs_structured() {
    let flat =
      NewPublication::for_version(RepoKind::Deb, "/v/1/", true)
        .body()
        .unwrap();
    assert_eq!(flat["simple"], true);
    assert_eq!(flat["structured"], false);

    let structured =
      NewPublication::for_version(RepoKind::Deb, "/v/1/", false)
        .body()
        .unwrap();
    assert_eq!(structured["simple"], false);
    assert_eq!(structured["structured"], true);
  }
}
