use axum::{Json, Router, extract::Query, routing::{get, post}};
use pulp_manager_client::api::auth::{
  JwtDecodedToken, JwtSignedToken, UsernamePasswordLogin,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serror::AddStatusCode as _;

use crate::{auth::local, state::jwt_client};

pub fn router() -> Router {
  Router::new()
    .route("/login", post(login))
    .route("/token_lookup", get(token_lookup))
}

/// Exchanges a username / password for a signed token carrying the user's
/// groups.
async fn login(
  serror::Json(body): serror::Json<UsernamePasswordLogin>,
) -> serror::Result<Json<JwtSignedToken>> {
  let groups = local::authenticate(&body.username, &body.password)
    .status_code(StatusCode::UNAUTHORIZED)?;
  let token = jwt_client().encode(body.username, groups)?;
  Ok(Json(token))
}

#[derive(Deserialize)]
struct TokenLookupQuery {
  token: String,
}

async fn token_lookup(
  Query(query): Query<TokenLookupQuery>,
) -> serror::Result<Json<JwtDecodedToken>> {
  let claims = jwt_client()
    .decode(&query.token)
    .status_code(StatusCode::UNAUTHORIZED)?;
  Ok(Json(JwtDecodedToken {
    expires: claims.expires_string(),
    username: claims.username,
    groups: claims.groups,
  }))
}
