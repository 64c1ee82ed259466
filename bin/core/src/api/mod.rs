use axum::{Router, routing::get};

use crate::config::cors_layer;

mod auth;
mod pulp_servers;
mod rq_jobs;
mod tasks;

pub fn app() -> Router {
  Router::new()
    .route("/version", get(|| async { env!("CARGO_PKG_VERSION") }))
    .nest("/v1/auth", auth::router())
    .nest("/v1/pulp_servers", pulp_servers::router())
    .nest("/v1/tasks", tasks::router())
    .nest("/v1/rq_jobs", rq_jobs::router())
    .layer(cors_layer())
}

/// Shared paging query params. Numbers are kept as strings because these
/// get flattened into the per-route query structs, and the urlencoded
/// deserializer only hands flattened fields through as strings.
#[derive(Debug, serde::Deserialize)]
pub struct Paging {
  pub page: Option<String>,
  pub page_size: Option<String>,
  pub sort_by: Option<String>,
  pub order_by: Option<String>,
}

/// Enum filters accept either the name (`completed`) or the stored
/// small-int id (`3`).
pub fn parse_name_or_value<T: std::str::FromStr>(
  input: &str,
  from_value: fn(i32) -> Option<T>,
) -> Option<T> {
  input
    .parse::<T>()
    .ok()
    .or_else(|| input.parse::<i32>().ok().and_then(from_value))
}

impl Paging {
  pub fn page(&self) -> u64 {
    self
      .page
      .as_deref()
      .and_then(|page| page.parse().ok())
      .unwrap_or(1)
  }

  pub fn page_size(&self) -> u64 {
    self
      .page_size
      .as_deref()
      .and_then(|page_size| page_size.parse().ok())
      .unwrap_or(crate::config::core_config().paging.default_page_size)
  }
}
