use anyhow::{Context, anyhow};

use crate::config::core_config;

/// Checks a username / password against the configured local users and
/// returns the groups the user belongs to. This is the credential backend
/// for deployments without an external directory; the token contract is
/// identical either way.
pub fn authenticate(
  username: &str,
  password: &str,
) -> anyhow::Result<Vec<String>> {
  let config = core_config();
  let user = config
    .auth
    .users
    .iter()
    .find(|user| user.username == username)
    .ok_or_else(|| anyhow!("unknown user {username}"))?;

  let valid = match (&user.password_hash, &user.password) {
    (Some(hash), _) => bcrypt::verify(password, hash)
      .context("failed to verify password hash")?,
    (None, Some(plain)) => plain == password,
    (None, None) => false,
  };

  if !valid {
    return Err(anyhow!("invalid credentials for {username}"));
  }
  Ok(user.groups.clone())
}
