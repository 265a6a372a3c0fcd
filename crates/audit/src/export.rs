//! One-file-per-attestation JSON mirror of the audit store.
//!
//! The SQLite store stays authoritative; the mirror is rewritten with the
//! latest state after every audit write so operators can inspect a single
//! attestation with nothing but a text editor.

use crate::store::{AuditedVerdict, SubmissionAttempt};
use attest_core::{AttestationId, SubmissionStatus};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ExportDocument<'a> {
    timestamp: String,
    attestation_id: AttestationId,
    verifier: &'a str,
    status: SubmissionStatus,
    record: &'a AuditedVerdict,
    attempts: &'a [SubmissionAttempt],
}

/// File name used for an attestation: the first 16 hex digits of its id.
pub fn export_file_name(attestation_id: &AttestationId) -> String {
    format!("{}.json", &attestation_id.to_hex()[..16])
}

/// Path of the mirror file for `attestation_id` under `dir`.
pub fn export_path(dir: &Path, attestation_id: &AttestationId) -> PathBuf {
    dir.join(export_file_name(attestation_id))
}

pub(crate) fn write_export(
    dir: &Path,
    record: &AuditedVerdict,
    attempts: &[SubmissionAttempt],
    status: SubmissionStatus,
) -> crate::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let document = ExportDocument {
        timestamp: Utc::now().to_rfc3339(),
        attestation_id: record.verdict.attestation_id,
        verifier: &record.verifier,
        status,
        record,
        attempts,
    };

    let path = export_path(dir, &record.verdict.attestation_id);
    std::fs::write(&path, serde_json::to_vec_pretty(&document)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_uses_id_prefix() {
        let id = AttestationId([0xab; 32]);
        assert_eq!(export_file_name(&id), "abababababababab.json");
    }
}
