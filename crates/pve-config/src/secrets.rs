//! Runtime secret resolution.
//!
//! Config YAML stores env var NAMES only (`database.url_env`). Binaries call
//! [`resolve_secrets`] once at startup and pass the result to constructors.
//! `Debug` output redacts values and errors reference the NAME, never the value.

use anyhow::{bail, Result};
use serde_json::Value;

const DEFAULT_DATABASE_URL_ENV: &str = "PVE_DATABASE_URL";

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Env var the connection string was read from.
    pub database_url_env: String,
    /// `None` when the env var is unset or blank.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// For commands that cannot run without Postgres.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_env
            ),
        }
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(config_json: &Value) -> ResolvedSecrets {
    let database_url_env = read_str_at(config_json, "/database/url_env")
        .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string());
    let database_url = resolve_env(&database_url_env);
    ResolvedSecrets {
        database_url_env,
        database_url,
    }
}
