//! Strategy and config artifacts, content-addressed with BLAKE3.
//!
//! The `UploadLedger` remembers the digest last uploaded per
//! (service, kind, name, trade type) so an unchanged artifact is not sent twice
//! within one controller's lifetime.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use stratdesk_core::TradeType;

use crate::endpoints::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Strategy source file (`{name}.py`).
    Strategy,
    /// Strategy config file (`{name}_config.py`), live trading only.
    Config,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Strategy => f.write_str("strategy"),
            ArtifactKind::Config => f.write_str("config"),
        }
    }
}

/// A file to upload, with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Logical name the engine keys on (file stem).
    pub name: String,
    pub file_name: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
    /// BLAKE3 hex digest of `bytes`.
    pub digest: String,
}

impl Artifact {
    pub fn from_bytes(file_name: impl Into<String>, kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let name = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let digest = blake3::hash(&bytes).to_hex().to_string();
        Self {
            name,
            file_name,
            kind,
            bytes,
            digest,
        }
    }

    pub fn from_path(path: &Path, kind: ArtifactKind) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        Ok(Self::from_bytes(file_name, kind, bytes))
    }

    /// Short digest prefix for logs.
    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    service: Service,
    kind: ArtifactKind,
    name: String,
    trade_type: Option<TradeType>,
}

/// Digests of artifacts already accepted by a service.
#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    uploaded: HashMap<LedgerKey, String>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(service: Service, artifact: &Artifact, trade_type: Option<TradeType>) -> LedgerKey {
        LedgerKey {
            service,
            kind: artifact.kind,
            name: artifact.name.clone(),
            trade_type,
        }
    }

    /// True if this exact content was already uploaded to `service`.
    pub fn is_current(
        &self,
        service: Service,
        artifact: &Artifact,
        trade_type: Option<TradeType>,
    ) -> bool {
        self.uploaded
            .get(&Self::key(service, artifact, trade_type))
            .is_some_and(|d| *d == artifact.digest)
    }

    pub fn record(&mut self, service: Service, artifact: &Artifact, trade_type: Option<TradeType>) {
        self.uploaded.insert(
            Self::key(service, artifact, trade_type),
            artifact.digest.clone(),
        );
    }

    /// Forget every entry for `name` on `service` (after a remote delete).
    pub fn forget(&mut self, service: Service, kind: ArtifactKind, name: &str) {
        self.uploaded
            .retain(|k, _| !(k.service == service && k.kind == kind && k.name == name));
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }
}
