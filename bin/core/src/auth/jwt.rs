use anyhow::Context;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
  DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use pulp_manager_client::api::auth::JwtSignedToken;
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;

#[derive(Serialize, Deserialize, Clone)]
pub struct JwtClaims {
  pub username: String,
  pub groups: Vec<String>,
  /// Unix seconds.
  pub exp: i64,
}

impl JwtClaims {
  pub fn expires_string(&self) -> String {
    DateTime::<Utc>::from_timestamp(self.exp, 0)
      .map(|expiry| expiry.format("%H:%M:%S %d-%m-%Y UTC").to_string())
      .unwrap_or_default()
  }
}

pub struct JwtClient {
  header: Header,
  validation: Validation,
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  ttl_seconds: i64,
}

impl JwtClient {
  pub fn new(config: &CoreConfig) -> anyhow::Result<JwtClient> {
    let secret = config.jwt_secret.as_bytes();
    Ok(JwtClient {
      header: Header::default(),
      validation: Validation::new(Default::default()),
      encoding_key: EncodingKey::from_secret(secret),
      decoding_key: DecodingKey::from_secret(secret),
      ttl_seconds: (config.auth.jwt_token_lifetime_mins * 60) as i64,
    })
  }

  pub fn encode(
    &self,
    username: String,
    groups: Vec<String>,
  ) -> anyhow::Result<JwtSignedToken> {
    let claims = JwtClaims {
      username,
      groups,
      exp: Utc::now().timestamp() + self.ttl_seconds,
    };
    let access_token =
      encode(&self.header, &claims, &self.encoding_key)
        .context("Failed at signing claim")?;
    Ok(JwtSignedToken { access_token })
  }

  pub fn decode(&self, jwt: &str) -> anyhow::Result<JwtClaims> {
    decode::<JwtClaims>(jwt, &self.decoding_key, &self.validation)
      .map(|res| res.claims)
      .context("Failed to decode token claims")
  }
}
