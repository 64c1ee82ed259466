use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernamePasswordLogin {
  pub username: String,
  pub password: String,
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSignedToken {
  pub access_token: String,
}

/// Claims surfaced by the token lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtDecodedToken {
  pub username: String,
  pub groups: Vec<String>,
  /// Expiry rendered as `%H:%M:%S %d-%m-%Y UTC`.
  pub expires: String,
}
