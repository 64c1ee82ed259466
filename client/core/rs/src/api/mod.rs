use serde::{Deserialize, Serialize};

pub mod auth;
pub mod pulp_server;
pub mod rq_jobs;
pub mod task;

/// Standard envelope for paged list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total: u64,
  pub page: u64,
  pub page_size: u64,
}

impl<T> Page<T> {
  pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
    Page {
      items: self.items.into_iter().map(f).collect(),
      total: self.total,
      page: self.page,
      page_size: self.page_size,
    }
  }
}
