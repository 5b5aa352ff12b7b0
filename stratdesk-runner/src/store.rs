//! On-disk session records, so terminate and reconcile can run in a later process.
//!
//! Layout: `{dir}/{session_id}.json`, one pretty-printed `Session` per file.

use std::path::{Path, PathBuf};
use thiserror::Error;

use stratdesk_core::Session;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session has no id yet and cannot be stored")]
    NoSessionId,

    #[error("session id '{0}' is not a safe file name")]
    UnsafeId(String),

    #[error("session I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session record {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let safe = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::UnsafeId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    pub fn save(&self, session: &Session) -> Result<PathBuf, StoreError> {
        let id = session.session_id().ok_or(StoreError::NoSessionId)?;
        let path = self.path_for(id)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(session).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// `Ok(None)` when no record exists for `session_id`.
    pub fn load(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.path_for(session_id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }
}
