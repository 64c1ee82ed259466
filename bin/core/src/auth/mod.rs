use anyhow::{Context, anyhow};
use axum::{
  extract::Request, http::HeaderMap, middleware::Next,
  response::Response,
};
use reqwest::StatusCode;
use serror::AddStatusCodeError as _;

use crate::{config::core_config, state::jwt_client};

pub mod jwt;
pub mod local;

use self::jwt::JwtClaims;

/// Middleware for routes that mutate state: requires a Bearer JWT whose
/// group claims intersect the configured admin groups. The verified claims
/// are inserted into request extensions for handlers that want the caller
/// identity.
pub async fn admin_request(
  headers: HeaderMap,
  mut req: Request,
  next: Next,
) -> serror::Result<Response> {
  let claims = claims_from_headers(&headers)
    .map_err(|e| e.status_code(StatusCode::FORBIDDEN))?;

  let admin_groups = &core_config().auth.admin_groups;
  let user_in_group = claims
    .groups
    .iter()
    .any(|group| admin_groups.contains(group));
  if !user_in_group {
    info!(
      "User {} not in groups {} to carry out: {} {}",
      claims.username,
      admin_groups.join(", "),
      req.method(),
      req.uri()
    );
    return Err(
      anyhow!(
        "Unauthorized, only users in the groups {} are allowed to \
         carry out {} {}",
        admin_groups.join(", "),
        req.method(),
        req.uri()
      )
      .status_code(StatusCode::UNAUTHORIZED),
    );
  }

  req.extensions_mut().insert(claims);
  Ok(next.run(req).await)
}

fn claims_from_headers(headers: &HeaderMap) -> anyhow::Result<JwtClaims> {
  let authorization = headers
    .get("authorization")
    .context("no authorization header provided")?
    .to_str()
    .context("authorization header is not valid UTF-8")?;
  let token = authorization
    .strip_prefix("Bearer ")
    .context("invalid authentication scheme, only Bearer is allowed")?;
  jwt_client().decode(token)
}
