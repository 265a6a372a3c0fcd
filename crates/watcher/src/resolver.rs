//! Content resolution: attestation id to raw reasoning document.
//!
//! Resolvers return bytes, not parsed JSON. Whatever comes back is untrusted
//! and goes through the full validator, so an undecodable payload still
//! yields a (failing) verdict rather than a dispatch error.

use attest_core::AttestationId;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No reasoning document for attestation {0}")]
    NotFound(AttestationId),

    #[error("Failed to read reasoning document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw reasoning payload for one attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningDocument {
    pub attestation_id: AttestationId,
    pub bytes: Vec<u8>,
}

pub trait ContentResolver {
    fn resolve(
        &self,
        attestation_id: &AttestationId,
    ) -> impl Future<Output = Result<ReasoningDocument, ResolveError>> + Send;
}

/// Reads `<dir>/0x<hex id>.json`, falling back to `<dir>/<hex id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidates(&self, attestation_id: &AttestationId) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{}.json", attestation_id)),
            self.dir.join(format!("{}.json", attestation_id.to_hex())),
        ]
    }
}

impl ContentResolver for DirectoryResolver {
    async fn resolve(
        &self,
        attestation_id: &AttestationId,
    ) -> Result<ReasoningDocument, ResolveError> {
        for path in self.candidates(attestation_id) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(path = %path.display(), size = bytes.len(), "Reasoning document loaded");
                    return Ok(ReasoningDocument {
                        attestation_id: *attestation_id,
                        bytes,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(ResolveError::Io { path, source }),
            }
        }
        Err(ResolveError::NotFound(*attestation_id))
    }
}

/// In-memory documents keyed by id, with an optional document served for
/// every other id.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    documents: HashMap<AttestationId, Vec<u8>>,
    fallback: Option<Vec<u8>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attestation_id: AttestationId, bytes: impl Into<Vec<u8>>) {
        self.documents.insert(attestation_id, bytes.into());
    }

    pub fn insert_json(&mut self, attestation_id: AttestationId, document: &serde_json::Value) {
        self.insert(attestation_id, document.to_string());
    }

    pub fn with_fallback(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.fallback = Some(bytes.into());
        self
    }
}

impl ContentResolver for StaticResolver {
    async fn resolve(
        &self,
        attestation_id: &AttestationId,
    ) -> Result<ReasoningDocument, ResolveError> {
        self.documents
            .get(attestation_id)
            .or(self.fallback.as_ref())
            .map(|bytes| ReasoningDocument {
                attestation_id: *attestation_id,
                bytes: bytes.clone(),
            })
            .ok_or(ResolveError::NotFound(*attestation_id))
    }
}
