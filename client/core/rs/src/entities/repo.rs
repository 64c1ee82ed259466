use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{I64, MongoId, int_enum_serde};

/// The repository flavors a backend can host. The name doubles as the
/// `<kind>` segment of backend API hrefs
/// (`/pulp/api/v3/repositories/<kind>/…`).
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
  Rpm,
  Deb,
  File,
  Python,
  Container,
}

impl RepoKind {
  /// Parses the kind out of a backend href of the shape
  /// `/pulp/api/v3/<category>/<kind>/…`. Unknown kinds are an error, never
  /// a default.
  pub fn from_href(href: &str) -> anyhow::Result<RepoKind> {
    let mut segments = href
      .trim_start_matches("/pulp/api/v3/")
      .split('/')
      .filter(|s| !s.is_empty());
    let _category = segments.next();
    let kind = segments
      .next()
      .ok_or_else(|| {
        anyhow::anyhow!("repo kind could not be determined from href {href}")
      })?;
    kind.parse().map_err(|_| {
      anyhow::anyhow!("unknown repo kind '{kind}' in href {href}")
    })
  }
}

/// Health classification of a repo sync (or the rollup over all of a
/// backend's repos). Stored as its small-int id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RepoHealthStatus {
  Green,
  Amber,
  Red,
}

impl RepoHealthStatus {
  pub fn value(&self) -> i32 {
    match self {
      RepoHealthStatus::Green => 1,
      RepoHealthStatus::Amber => 2,
      RepoHealthStatus::Red => 3,
    }
  }

  pub fn from_value(value: i32) -> Option<RepoHealthStatus> {
    match value {
      1 => Some(RepoHealthStatus::Green),
      2 => Some(RepoHealthStatus::Amber),
      3 => Some(RepoHealthStatus::Red),
      _ => None,
    }
  }
}

int_enum_serde!(RepoHealthStatus);

/// A repo known to Pulp Manager. Hrefs differ between backends, so the repo
/// itself is just (name, kind); the per-backend binding lives on
/// [PulpServerRepo][super::server::PulpServerRepo].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub name: String,
  pub repo_type: RepoKind,
  pub date_created: I64,
  pub date_last_updated: I64,
}

/// A named repo selection (include / exclude regexes over repo names), used
/// as the scheduling unit for syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoGroup {
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub regex_include: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub regex_exclude: Option<String>,
  pub date_created: I64,
  pub date_last_updated: I64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repo_kind_from_repository_href() {
    let kind = RepoKind::from_href(
      "/pulp/api/v3/repositories/deb/apt/018f2e/",
    )
    .unwrap();
    assert_eq!(kind, RepoKind::Deb);
  }

  #[test]
  fn repo_kind_from_remote_href() {
    let kind =
      RepoKind::from_href("/pulp/api/v3/remotes/rpm/rpm/018f2e/")
        .unwrap();
    assert_eq!(kind, RepoKind::Rpm);
  }

  #[test]
  fn repo_kind_rejects_unknown() {
    assert!(
      RepoKind::from_href("/pulp/api/v3/repositories/ostree/ostree/x/")
        .is_err()
    );
    assert!(RepoKind::from_href("/pulp/api/v3/").is_err());
  }

  #[test]
  fn health_round_trips_through_int() {
    let json = serde_json::to_string(&RepoHealthStatus::Amber).unwrap();
    assert_eq!(json, "2");
    let back: RepoHealthStatus = serde_json::from_str("2").unwrap();
    assert_eq!(back, RepoHealthStatus::Amber);
  }

  #[test]
  fn health_accepts_name_on_input() {
    let back: RepoHealthStatus =
      serde_json::from_str("\"red\"").unwrap();
    assert_eq!(back, RepoHealthStatus::Red);
    assert!(serde_json::from_str::<RepoHealthStatus>("\"olive\"").is_err());
    assert!(serde_json::from_str::<RepoHealthStatus>("9").is_err());
  }
}
