//! Rebuilds the local snapshot of what one backend owns: its remotes,
//! repositories and distributions collapse into Repo + PulpServerRepo rows
//! keyed by repository name.

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use database::mungos::{
  by_id::update_one_by_id,
  find::find_collect,
  mongodb::bson::{doc, oid::ObjectId, to_bson},
  update::Update,
};
use pulp3_client::{
  Pulp3Client,
  distributions::get_all_distributions,
  remotes::get_all_remotes,
  repositories::get_all_repos,
  resources::{Distribution, Remote, Repository},
};
use pulp_manager_client::entities::{
  pulp_manager_timestamp,
  repo::{Repo, RepoKind},
  server::{PulpServer, PulpServerRepo},
};
use serde::Serialize;

use crate::state::db_client;

/// Outcome of a reconcile pass, recorded in the reconcile stage detail.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileSummary {
  pub seen: usize,
  pub added: usize,
  pub updated: usize,
  pub removed: usize,
  /// Repository names that appeared more than once on the backend. The
  /// lexicographically smallest href won.
  pub duplicates: Vec<String>,
  /// Repos skipped because the backend reports a different type than the
  /// local Repo row. Repo identity does not change type.
  pub type_mismatches: Vec<String>,
}

/// One repository grouped with its remote and distribution.
struct BackendRepoState {
  kind: RepoKind,
  repository: Repository,
  remote: Option<Remote>,
  distribution: Option<Distribution>,
}

/// Collapses the backend listings into per-name state. Duplicate names keep
/// the smallest href so reconcile results are stable between runs.
fn group_by_name(
  repositories: Vec<Repository>,
  remotes: Vec<Remote>,
  distributions: Vec<Distribution>,
) -> (BTreeMap<String, BackendRepoState>, Vec<String>) {
  let remotes_by_href: HashMap<String, Remote> = remotes
    .into_iter()
    .map(|remote| (remote.pulp_href.clone(), remote))
    .collect();
  let mut distributions_by_repo: HashMap<String, Distribution> =
    distributions
      .into_iter()
      .filter_map(|distribution| {
        distribution
          .repository
          .clone()
          .map(|repository| (repository, distribution))
      })
      .collect();

  let mut grouped: BTreeMap<String, BackendRepoState> = BTreeMap::new();
  let mut duplicates = Vec::new();

  for repository in repositories {
    let Ok(kind) = RepoKind::from_href(&repository.pulp_href) else {
      warn!(
        "skipping repository {} with unrecognised href {}",
        repository.name, repository.pulp_href
      );
      continue;
    };
    match grouped.get_mut(&repository.name) {
      Some(existing) => {
        if !duplicates.contains(&repository.name) {
          duplicates.push(repository.name.clone());
        }
        warn!(
          "duplicate repository name {} on backend, keeping smallest href",
          repository.name
        );
        if repository.pulp_href < existing.repository.pulp_href {
          existing.repository = repository;
          existing.kind = kind;
        }
      }
      None => {
        grouped.insert(
          repository.name.clone(),
          BackendRepoState {
            kind,
            repository,
            remote: None,
            distribution: None,
          },
        );
      }
    }
  }

  for state in grouped.values_mut() {
    state.remote = state
      .repository
      .remote
      .as_ref()
      .and_then(|href| remotes_by_href.get(href))
      .cloned();
    state.distribution =
      distributions_by_repo.remove(&state.repository.pulp_href);
  }

  (grouped, duplicates)
}

/// Pulls the backend's remote / repository / distribution lists and
/// rebuilds the local Repo and PulpServerRepo rows for it. Rows for repos
/// that vanished from the backend are removed along with their task links.
pub async fn reconcile(
  server: &PulpServer,
  client: &Pulp3Client,
) -> anyhow::Result<ReconcileSummary> {
  let db = db_client();
  let mut summary = ReconcileSummary::default();

  debug!("fetching remotes, repositories and distributions from {}", server.name);
  let repositories = get_all_repos(client, None, None)
    .await
    .context("failed to list repositories")?;
  let remotes = get_all_remotes(client, None, None)
    .await
    .context("failed to list remotes")?;
  let distributions = get_all_distributions(client, None, None)
    .await
    .context("failed to list distributions")?;

  let (grouped, duplicates) =
    group_by_name(repositories, remotes, distributions);
  summary.duplicates = duplicates;
  summary.seen = grouped.len();

  let local_repos: HashMap<String, Repo> =
    find_collect(&db.repos, None, None)
      .await
      .context("failed to query repos")?
      .into_iter()
      .map(|repo| (repo.name.clone(), repo))
      .collect();

  let mut server_repos: HashMap<String, PulpServerRepo> = find_collect(
    &db.pulp_server_repos,
    doc! { "pulp_server_id": &server.id },
    None,
  )
  .await
  .context("failed to query pulp server repos")?
  .into_iter()
  .map(|repo| (repo.repo_name.clone(), repo))
  .collect();

  let now = pulp_manager_timestamp();

  for (name, state) in grouped {
    let repo_id = match local_repos.get(&name) {
      Some(repo) if repo.repo_type != state.kind => {
        error!(
          "repo {name} is registered as {} but backend {} reports {}",
          repo.repo_type, server.name, state.kind
        );
        summary.type_mismatches.push(name.clone());
        continue;
      }
      Some(repo) => repo.id.clone(),
      None => {
        let repo = Repo {
          id: String::new(),
          name: name.clone(),
          repo_type: state.kind,
          date_created: now,
          date_last_updated: now,
        };
        let result = db
          .repos
          .insert_one(&repo)
          .await
          .context("failed to insert repo")?;
        result
          .inserted_id
          .as_object_id()
          .context("repo insert returned no object id")?
          .to_hex()
      }
    };

    let remote_href =
      state.remote.as_ref().map(|remote| remote.pulp_href.clone());
    let remote_feed =
      state.remote.as_ref().map(|remote| remote.url.clone());
    let distribution_href = state
      .distribution
      .as_ref()
      .map(|distribution| distribution.pulp_href.clone());

    match server_repos.remove(&name) {
      Some(existing) => {
        let update = doc! {
          "repo_href": &state.repository.pulp_href,
          "remote_href": to_bson(&remote_href)?,
          "remote_feed": to_bson(&remote_feed)?,
          "distribution_href": to_bson(&distribution_href)?,
          "repo_type": to_bson(&state.kind)?,
          "date_last_updated": now,
        };
        update_one_by_id(
          &db.pulp_server_repos,
          &existing.id,
          Update::Set(update),
          None,
        )
        .await
        .context("failed to update pulp server repo")?;
        summary.updated += 1;
      }
      None => {
        let server_repo = PulpServerRepo {
          id: String::new(),
          pulp_server_id: server.id.clone(),
          repo_id,
          pulp_server_name: server.name.clone(),
          repo_name: name.clone(),
          repo_type: state.kind,
          repo_href: state.repository.pulp_href.clone(),
          remote_href,
          remote_feed,
          distribution_href,
          repo_sync_health: None,
          repo_sync_health_date: None,
          date_created: now,
          date_last_updated: now,
        };
        db.pulp_server_repos
          .insert_one(&server_repo)
          .await
          .context("failed to insert pulp server repo")?;
        summary.added += 1;
      }
    }
  }

  // Whatever is left was not seen on the backend any more.
  for (name, stale) in server_repos {
    debug!("removing {} from {}, no longer on backend", name, server.name);
    db.pulp_server_repo_tasks
      .delete_many(doc! { "pulp_server_repo_id": &stale.id })
      .await
      .context("failed to remove repo task links")?;
    db.pulp_server_repos
      .delete_one(doc! { "_id": ObjectId::parse_str(&stale.id)? })
      .await
      .context("failed to remove pulp server repo")?;
    summary.removed += 1;
  }

  info!(
    "reconcile of {} complete: {} seen, {} added, {} updated, {} removed",
    server.name, summary.seen, summary.added, summary.updated,
    summary.removed
  );

  Ok(summary)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn repository(name: &str, href: &str) -> Repository {
    Repository {
      pulp_href: href.to_string(),
      name: name.to_string(),
      description: None,
      versions_href: None,
      latest_version_href: Some(format!("{href}versions/1/")),
      remote: None,
      retain_repo_versions: None,
    }
  }

  #[test]
  fn duplicate_names_keep_smallest_href() {
    let (grouped, duplicates) = group_by_name(
      vec![
        repository("ext-foo", "/pulp/api/v3/repositories/rpm/rpm/b/"),
        repository("ext-foo", "/pulp/api/v3/repositories/rpm/rpm/a/"),
      ],
      vec![],
      vec![],
    );
    assert_eq!(duplicates, vec!["ext-foo".to_string()]);
    assert_eq!(
      grouped["ext-foo"].repository.pulp_href,
      "/pulp/api/v3/repositories/rpm/rpm/a/"
    );
  }

  #[test]
  fn remote_and_distribution_attach_by_href() {
    let mut repo =
      repository("ext-foo", "/pulp/api/v3/repositories/rpm/rpm/a/");
    repo.remote = Some("/pulp/api/v3/remotes/rpm/rpm/r1/".to_string());
    let remote = Remote {
      pulp_href: "/pulp/api/v3/remotes/rpm/rpm/r1/".to_string(),
      name: "ext-foo".to_string(),
      url: "https://upstream/foo".to_string(),
      policy: None,
      distributions: None,
    };
    let distribution = Distribution {
      pulp_href: "/pulp/api/v3/distributions/rpm/rpm/d1/".to_string(),
      name: "ext-foo".to_string(),
      base_path: "ext-foo".to_string(),
      base_url: None,
      repository: Some("/pulp/api/v3/repositories/rpm/rpm/a/".to_string()),
      publication: None,
    };
    let (grouped, _) =
      group_by_name(vec![repo], vec![remote], vec![distribution]);
    let state = &grouped["ext-foo"];
    assert_eq!(
      state.remote.as_ref().unwrap().url,
      "https://upstream/foo"
    );
    assert_eq!(
      state.distribution.as_ref().unwrap().base_path,
      "ext-foo"
    );
  }
}
