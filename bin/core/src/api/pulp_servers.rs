use anyhow::Context;
use axum::{
  Json, Router,
  extract::{Path, Query},
  middleware,
  routing::{get, post},
};
use database::{
  filter::{build_filter, sort_options},
  mungos::{
    by_id::find_one_by_id,
    find::find_collect,
    mongodb::{
      bson::{Bson, doc},
      options::FindOptions,
    },
  },
  paged::filter_paged_result,
};
use job_queue::{DEFAULT_QUEUE, JobKind};
use pulp3_client::{content::get_package_content, repositories::get_repo};
use pulp_manager_client::{
  api::{
    Page,
    pulp_server::{
      FindRepoPackageContent, PulpServerRepoGroupResponse,
      PulpServerRepoRemovalConfig, PulpServerRepoResponse,
      PulpServerResponse, PulpServerSnapshotConfig,
      PulpServerSyncConfig, RemoveRepoContent,
    },
    task::TaskResponse,
  },
  entities::{
    repo::RepoKind,
    server::{PulpServer, PulpServerRepo},
    task::TaskType,
  },
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use serror::{AddStatusCode as _, AddStatusCodeError as _};

use crate::{
  auth::admin_request,
  config::core_config,
  helpers::{new_pulp_client, parse_duration, task::create_task},
  state::{db_client, queue_client},
};

/// Filter names on the repos listing that live on joined entities in the
/// relational view; here they map onto the denormalised columns.
const REPO_FILTER_ALIASES: &[(&str, &str)] = &[
  ("name", "repo_name"),
  ("pulp_server_name", "pulp_server_name"),
];

pub fn router() -> Router {
  Router::new()
    .route("/", get(get_all))
    .route("/{id}", get(get_one))
    .route("/{id}/repo_groups", get(get_repo_groups))
    .route("/{id}/repos", get(get_repos))
    .route("/{id}/repos/{repo_id}", get(get_repo_one))
    .route("/{id}/repos/{repo_id}/content:find", post(content_find))
    .route("/{id}/repos/{repo_id}/tasks", get(get_repo_tasks))
    .merge(
      Router::new()
        .route(
          "/{id}/repos/{repo_id}/content:remove",
          post(content_remove),
        )
        .route("/{id}/sync", post(sync))
        .route("/{id}/snapshot", post(snapshot))
        .route("/{id}/remove", post(remove))
        .layer(middleware::from_fn(admin_request)),
    )
}

async fn get_server_404(id: &str) -> serror::Result<PulpServer> {
  find_one_by_id(&db_client().pulp_servers, id)
    .await
    .ok()
    .flatten()
    .context("Pulp server not found")
    .status_code(StatusCode::NOT_FOUND)
}

async fn get_server_repo_404(
  server: &PulpServer,
  repo_id: &str,
) -> serror::Result<PulpServerRepo> {
  let repo = find_one_by_id(&db_client().pulp_server_repos, repo_id)
    .await
    .ok()
    .flatten()
    .filter(|repo: &PulpServerRepo| repo.pulp_server_id == server.id)
    .context("Repo not found on pulp server")
    .status_code(StatusCode::NOT_FOUND)?;
  Ok(repo)
}

#[derive(Debug, Deserialize)]
struct PulpServersQuery {
  name: Option<String>,
  name__match: Option<String>,
  #[serde(flatten)]
  paging: super::Paging,
}

async fn get_all(
  Query(query): Query<PulpServersQuery>,
) -> serror::Result<Json<Page<PulpServerResponse>>> {
  let mut params: Vec<(String, Bson)> = Vec::new();
  if let Some(name) = query.name {
    params.push((String::from("name"), name.into()));
  }
  if let Some(name) = query.name__match {
    params.push((String::from("name__match"), name.into()));
  }

  let filter = build_filter(&params, &[])
    .map_err(anyhow::Error::new)
    .status_code(StatusCode::BAD_REQUEST)?;
  let sort = sort_options(
    query.paging.sort_by.as_deref(),
    query.paging.order_by.as_deref(),
    &[],
  )
  .map_err(anyhow::Error::new)
  .status_code(StatusCode::BAD_REQUEST)?;

  let page = filter_paged_result(
    &db_client().pulp_servers,
    filter,
    sort,
    query.paging.page(),
    query.paging.page_size(),
    core_config().paging.max_page_size,
  )
  .await
  .status_code(StatusCode::BAD_REQUEST)?;

  Ok(Json(page.map(PulpServerResponse::from)))
}

async fn get_one(
  Path(id): Path<String>,
) -> serror::Result<Json<PulpServerResponse>> {
  let server = get_server_404(&id).await?;
  Ok(Json(server.into()))
}

/// The repo groups bound to a backend, with their schedules.
async fn get_repo_groups(
  Path(id): Path<String>,
) -> serror::Result<Json<Vec<PulpServerRepoGroupResponse>>> {
  let server = get_server_404(&id).await?;
  let groups = find_collect(
    &db_client().pulp_server_repo_groups,
    doc! { "pulp_server_id": &server.id },
    None,
  )
  .await
  .context("failed to query pulp server repo groups")?;
  Ok(Json(
    groups
      .into_iter()
      .map(PulpServerRepoGroupResponse::from)
      .collect(),
  ))
}

#[derive(Debug, Deserialize)]
struct ReposQuery {
  name: Option<String>,
  name__match: Option<String>,
  repo_type: Option<String>,
  #[serde(flatten)]
  paging: super::Paging,
}

async fn get_repos(
  Path(id): Path<String>,
  Query(query): Query<ReposQuery>,
) -> serror::Result<Json<Page<PulpServerRepoResponse>>> {
  let server = get_server_404(&id).await?;

  let mut params: Vec<(String, Bson)> =
    vec![(String::from("pulp_server_id"), server.id.into())];
  if let Some(name) = query.name {
    params.push((String::from("name"), name.into()));
  }
  if let Some(name) = query.name__match {
    params.push((String::from("name__match"), name.into()));
  }
  if let Some(repo_type) = query.repo_type {
    let repo_type: RepoKind = repo_type
      .parse()
      .ok()
      .with_context(|| format!("invalid repo_type '{repo_type}'"))
      .status_code(StatusCode::BAD_REQUEST)?;
    params
      .push((String::from("repo_type"), repo_type.to_string().into()));
  }

  let filter = build_filter(&params, REPO_FILTER_ALIASES)
    .map_err(anyhow::Error::new)
    .status_code(StatusCode::BAD_REQUEST)?;
  let sort = sort_options(
    query.paging.sort_by.as_deref(),
    query.paging.order_by.as_deref(),
    REPO_FILTER_ALIASES,
  )
  .map_err(anyhow::Error::new)
  .status_code(StatusCode::BAD_REQUEST)?;

  let page = filter_paged_result(
    &db_client().pulp_server_repos,
    filter,
    sort,
    query.paging.page(),
    query.paging.page_size(),
    core_config().paging.max_page_size,
  )
  .await
  .status_code(StatusCode::BAD_REQUEST)?;

  Ok(Json(page.map(PulpServerRepoResponse::from)))
}

async fn get_repo_one(
  Path((id, repo_id)): Path<(String, String)>,
) -> serror::Result<Json<PulpServerRepoResponse>> {
  let server = get_server_404(&id).await?;
  let repo = get_server_repo_404(&server, &repo_id).await?;
  Ok(Json(repo.into()))
}

/// Queries the package content of the repo's latest version on the
/// backend, filtered by the given fields.
async fn content_find(
  Path((id, repo_id)): Path<(String, String)>,
  serror::Json(body): serror::Json<FindRepoPackageContent>,
) -> serror::Result<Json<Vec<Value>>> {
  let server = get_server_404(&id).await?;
  let repo = get_server_repo_404(&server, &repo_id).await?;

  let client = new_pulp_client(&server);
  let pulp_repo = get_repo(&client, &repo.repo_href).await?;
  let latest = pulp_repo
    .latest_version_href
    .context("repo has no versions")?;

  let mut params =
    vec![(String::from("repository_version"), latest)];
  if let Some(name) = body.name {
    // DEB names its package-name field differently
    let key = if repo.repo_type == RepoKind::Deb {
      "package"
    } else {
      "name"
    };
    params.push((key.to_string(), name));
  }
  if let Some(version) = body.version {
    params.push((String::from("version"), version));
  }
  if let Some(sha256) = body.sha256 {
    params.push((String::from("sha256"), sha256));
  }

  let content =
    get_package_content(&client, repo.repo_type, &params).await?;
  Ok(Json(content))
}

/// Enqueues the removal of a single content unit from the repo.
async fn content_remove(
  Path((id, repo_id)): Path<(String, String)>,
  serror::Json(body): serror::Json<RemoveRepoContent>,
) -> serror::Result<Json<TaskResponse>> {
  let server = get_server_404(&id).await?;
  let repo = get_server_repo_404(&server, &repo_id).await?;
  let timeout = parse_duration(&body.max_runtime)
    .status_code(StatusCode::BAD_REQUEST)?;

  let task = create_task(
    format!(
      "{} remove content from {}",
      server.name, repo.repo_name
    ),
    TaskType::RemoveRepoContent,
    json!({
      "name": server.name,
      "repo_name": repo.repo_name,
      "content_href": body.content_href,
      "force_publish": body.force_publish,
      "max_runtime": body.max_runtime,
    }),
    None,
  )
  .await?;

  queue_client()
    .enqueue(
      DEFAULT_QUEUE,
      JobKind::RemoveRepoContent,
      json!({
        "name": server.name,
        "repo_name": repo.repo_name,
        "content_href": body.content_href,
        "force_publish": body.force_publish,
        "task_id": task.id,
      }),
      Some(timeout.as_secs()),
    )
    .await
    .map_err(anyhow::Error::new)?;

  Ok(Json(task.into()))
}

/// Tasks linked to a repo, newest first.
async fn get_repo_tasks(
  Path((id, repo_id)): Path<(String, String)>,
  Query(paging): Query<super::Paging>,
) -> serror::Result<Json<Page<TaskResponse>>> {
  let server = get_server_404(&id).await?;
  let repo = get_server_repo_404(&server, &repo_id).await?;

  let page = paging.page().max(1);
  let page_size = paging.page_size();
  if page_size > core_config().paging.max_page_size {
    return Err(
      anyhow::anyhow!(
        "page_size larger than {} not allowed",
        core_config().paging.max_page_size
      )
      .status_code(StatusCode::BAD_REQUEST)
      .into(),
    );
  }

  let links = find_collect(
    &db_client().pulp_server_repo_tasks,
    doc! { "pulp_server_repo_id": &repo.id },
    FindOptions::builder().sort(doc! { "date_created": -1 }).build(),
  )
  .await
  .context("failed to query repo task links")?;

  let total = links.len() as u64;
  let start = ((page - 1) * page_size) as usize;
  let mut items = Vec::new();
  for link in links.iter().skip(start).take(page_size as usize) {
    if let Some(task) =
      find_one_by_id(&db_client().tasks, &link.task_id)
        .await
        .context("failed to query linked task")?
    {
      items.push(TaskResponse::from(task));
    }
  }

  Ok(Json(Page {
    items,
    total,
    page,
    page_size,
  }))
}

/// Enqueues a sync run for the backend.
async fn sync(
  Path(id): Path<String>,
  serror::Json(body): serror::Json<PulpServerSyncConfig>,
) -> serror::Result<Json<TaskResponse>> {
  let server = get_server_404(&id).await?;
  if body.max_concurrent_syncs == 0 {
    return Err(
      anyhow::anyhow!("max_concurrent_syncs must be greater than 0")
        .status_code(StatusCode::BAD_REQUEST)
        .into(),
    );
  }
  let timeout = parse_duration(&body.max_runtime)
    .status_code(StatusCode::BAD_REQUEST)?;

  let task = create_task(
    format!("repo sync {}", server.name),
    TaskType::RepoGroupSync,
    json!({
      "name": server.name,
      "regex_include": body.regex_include,
      "regex_exclude": body.regex_exclude,
      "max_concurrent_syncs": body.max_concurrent_syncs,
      "source_pulp_server_name": body.source_pulp_server_name,
      "sync_options": body.sync_options,
      "max_runtime": body.max_runtime,
    }),
    None,
  )
  .await?;

  queue_client()
    .enqueue(
      DEFAULT_QUEUE,
      JobKind::SyncRepos,
      json!({
        "name": server.name,
        "max_concurrent_syncs": body.max_concurrent_syncs,
        "regex_include": body.regex_include,
        "regex_exclude": body.regex_exclude,
        "source_pulp_server_name": body.source_pulp_server_name,
        "sync_options": body.sync_options,
        "task_id": task.id,
      }),
      Some(timeout.as_secs()),
    )
    .await
    .map_err(anyhow::Error::new)?;

  Ok(Json(task.into()))
}

/// Enqueues a snapshot run for the backend.
async fn snapshot(
  Path(id): Path<String>,
  serror::Json(body): serror::Json<PulpServerSnapshotConfig>,
) -> serror::Result<Json<TaskResponse>> {
  let server = get_server_404(&id).await?;
  if !server.snapshot_supported {
    return Err(
      anyhow::anyhow!(
        "pulp server {} not supported for repo snapshots",
        server.name
      )
      .status_code(StatusCode::BAD_REQUEST)
      .into(),
    );
  }
  let timeout = parse_duration(&body.max_runtime)
    .status_code(StatusCode::BAD_REQUEST)?;

  let task = create_task(
    format!("{} repo snapshot", server.name),
    TaskType::RepoSnapshot,
    json!({
      "snapshot_prefix": body.snapshot_prefix,
      "max_concurrent_snapshots": server.max_concurrent_snapshots,
      "regex_include": body.regex_include,
      "regex_exclude": body.regex_exclude,
      "allow_snapshot_reuse": body.allow_snapshot_reuse,
      "max_runtime": body.max_runtime,
    }),
    None,
  )
  .await?;

  queue_client()
    .enqueue(
      DEFAULT_QUEUE,
      JobKind::SnapshotRepos,
      json!({
        "name": server.name,
        "snapshot_prefix": body.snapshot_prefix,
        "allow_snapshot_reuse": body.allow_snapshot_reuse,
        "regex_include": body.regex_include,
        "regex_exclude": body.regex_exclude,
        "task_id": task.id,
      }),
      Some(timeout.as_secs()),
    )
    .await
    .map_err(anyhow::Error::new)?;

  Ok(Json(task.into()))
}

/// Enqueues a bulk repo removal for the backend.
async fn remove(
  Path(id): Path<String>,
  serror::Json(body): serror::Json<PulpServerRepoRemovalConfig>,
) -> serror::Result<Json<TaskResponse>> {
  let server = get_server_404(&id).await?;
  if body.regex_include.is_none() && body.regex_exclude.is_none() {
    return Err(
      anyhow::anyhow!(
        "Must specify at least one of regex_include or regex_exclude"
      )
      .status_code(StatusCode::BAD_REQUEST)
      .into(),
    );
  }
  let timeout = parse_duration(&body.max_runtime)
    .status_code(StatusCode::BAD_REQUEST)?;

  let task = create_task(
    format!("{} repo removal", server.name),
    TaskType::RepoRemoval,
    json!({
      "regex_include": body.regex_include,
      "regex_exclude": body.regex_exclude,
      "dry_run": body.dry_run,
      "max_runtime": body.max_runtime,
    }),
    None,
  )
  .await?;

  queue_client()
    .enqueue(
      DEFAULT_QUEUE,
      JobKind::RemoveRepos,
      json!({
        "name": server.name,
        "regex_include": body.regex_include,
        "regex_exclude": body.regex_exclude,
        "dry_run": body.dry_run,
        "task_id": task.id,
      }),
      Some(timeout.as_secs()),
    )
    .await
    .map_err(anyhow::Error::new)?;

  Ok(Json(task.into()))
}
