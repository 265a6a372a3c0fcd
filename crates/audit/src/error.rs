//! Audit store errors

use attest_core::AttestationId;
use thiserror::Error;

/// Errors that can occur in audit store operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Verdict already recorded for attestation {attestation_id}")]
    DuplicateVerdict { attestation_id: AttestationId },

    #[error("No verdict recorded for attestation {attestation_id}")]
    VerdictNotFound { attestation_id: AttestationId },

    #[error("Verdict for {verdict} does not match event {event}")]
    MismatchedEvent {
        verdict: AttestationId,
        event: AttestationId,
    },

    #[error("Audit log corrupted: {0}")]
    CorruptionDetected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
