//! Credential resolution.
//!
//! Two secrets are needed:
//! - `USER_KEY`: identifies the account; it is a path segment of every service URL
//! - `DATA_API_KEY` (alias `DATA_KEY`): market-data key forwarded in backtest payloads
//!
//! Both are read once, at startup, from the process environment (optionally
//! seeded from a `.env` file) and passed to constructors. `Debug` output and
//! error messages never contain values, only variable names.

use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const USER_KEY_VAR: &str = "USER_KEY";
pub const DATA_API_KEY_VAR: &str = "DATA_API_KEY";
pub const DATA_API_KEY_ALIAS: &str = "DATA_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("missing required environment variable(s): {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

/// A secret string. Redacted in `Debug`, masked in `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only call this where the value goes on the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl fmt::Display for Secret {
    /// Last four characters only, e.g. `***c0de`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.chars().count();
        if n <= 4 {
            return f.write_str("***");
        }
        let tail: String = self.0.chars().skip(n - 4).collect();
        write!(f, "***{tail}")
    }
}

/// Resolved credentials for one process.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_key: Secret,
    pub data_api_key: Secret,
}

impl Credentials {
    pub fn new(user_key: impl Into<String>, data_api_key: impl Into<String>) -> Self {
        Self {
            user_key: Secret::new(user_key),
            data_api_key: Secret::new(data_api_key),
        }
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve through an arbitrary lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let user_key = read(USER_KEY_VAR);
        let data_api_key = read(DATA_API_KEY_VAR).or_else(|| read(DATA_API_KEY_ALIAS));

        match (user_key, data_api_key) {
            (Some(user_key), Some(data_api_key)) => Ok(Self::new(user_key, data_api_key)),
            (user_key, data_api_key) => {
                let mut missing = Vec::new();
                if user_key.is_none() {
                    missing.push(USER_KEY_VAR);
                }
                if data_api_key.is_none() {
                    missing.push(DATA_API_KEY_VAR);
                }
                Err(CredentialsError::Missing(missing))
            }
        }
    }
}

/// Load `path` (or `./.env` when `None`) into the process environment.
///
/// A missing file is not an error. Variables already set are not overridden.
pub fn load_dotenv(path: Option<&Path>) -> Result<(), CredentialsError> {
    let result = match path {
        Some(p) => dotenvy::from_path(p).map(|_| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(CredentialsError::EnvFile {
            path: path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".env".into()),
            reason: e.to_string(),
        }),
    }
}
