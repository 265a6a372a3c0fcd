//! Verification verdicts and their submission lifecycle.

use crate::types::{AttestationId, TxHash};
use serde::{Deserialize, Serialize};

/// Minimum score for a verdict to pass.
pub const PASS_THRESHOLD: u8 = 60;

/// Score for `passed` out of `total` checks, floored to an integer percentage.
pub fn score_for(passed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let passed = passed.min(total);
    ((passed as u64 * 100) / total as u64) as u8
}

/// Outcome of running the validator over one reasoning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the score reached the pass threshold
    pub passed: bool,
    /// Score in [0, 100]
    pub score: u8,
    /// First failure seen, or a fixed success message
    pub reason: String,
    /// Checks that passed
    pub checks_passed: u32,
    /// Checks in the battery
    pub checks_total: u32,
    /// Hex SHA-256 of the canonical serialization, when the input decoded
    pub content_hash: Option<String>,
}

impl ValidationReport {
    /// Build a report from a check tally, deriving score and pass flag.
    pub fn from_tally(
        checks_passed: u32,
        checks_total: u32,
        pass_threshold: u8,
        reason: impl Into<String>,
        content_hash: Option<String>,
    ) -> Self {
        let score = score_for(checks_passed, checks_total);
        Self {
            passed: score >= pass_threshold,
            score,
            reason: reason.into(),
            checks_passed,
            checks_total,
            content_hash,
        }
    }

    /// A void report: nothing counts, the record is rejected outright.
    pub fn void(checks_total: u32, reason: impl Into<String>, content_hash: Option<String>) -> Self {
        Self {
            passed: false,
            score: 0,
            reason: reason.into(),
            checks_passed: 0,
            checks_total,
            content_hash,
        }
    }
}

/// A verdict bound to an attestation. Immutable once created; resubmission
/// always carries the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub attestation_id: AttestationId,
    pub passed: bool,
    pub score: u8,
    pub reason: String,
    pub checks_passed: u32,
    pub checks_total: u32,
    pub content_hash: Option<String>,
}

impl VerificationVerdict {
    /// Bind a validation report to the attestation it judged.
    pub fn from_report(attestation_id: AttestationId, report: ValidationReport) -> Self {
        Self {
            attestation_id,
            passed: report.passed,
            score: report.score,
            reason: report.reason,
            checks_passed: report.checks_passed,
            checks_total: report.checks_total,
            content_hash: report.content_hash,
        }
    }
}

/// What happened to one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Included on-chain with a success status
    Confirmed { tx_hash: TxHash },
    /// Included on-chain but execution failed
    Reverted { tx_hash: TxHash },
    /// Dry-run: nothing was sent
    DryRun { tx_hash: TxHash },
    /// Sent, but no receipt arrived before the confirmation timeout. The
    /// transaction may still be included later.
    Unconfirmed { tx_hash: TxHash, error: String },
    /// Never sent, or refused by the ledger
    Failed { error: String, retryable: bool },
}

impl SubmissionOutcome {
    /// Stable label used in the audit store.
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Confirmed { .. } => "confirmed",
            SubmissionOutcome::Reverted { .. } => "reverted",
            SubmissionOutcome::DryRun { .. } => "dry_run",
            SubmissionOutcome::Unconfirmed { .. } => "unconfirmed",
            SubmissionOutcome::Failed { .. } => "failed",
        }
    }

    /// Transaction hash, when one exists.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SubmissionOutcome::Confirmed { tx_hash }
            | SubmissionOutcome::Reverted { tx_hash }
            | SubmissionOutcome::DryRun { tx_hash }
            | SubmissionOutcome::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            SubmissionOutcome::Failed { .. } => None,
        }
    }

    /// Whether a later attempt may still settle the verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionOutcome::Unconfirmed { .. } => true,
            SubmissionOutcome::Failed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Submission status implied by this being the latest attempt.
    pub fn status(&self) -> SubmissionStatus {
        match self {
            SubmissionOutcome::Confirmed { .. } => SubmissionStatus::Submitted,
            SubmissionOutcome::DryRun { .. } => SubmissionStatus::DryRun,
            SubmissionOutcome::Reverted { .. }
            | SubmissionOutcome::Unconfirmed { .. }
            | SubmissionOutcome::Failed { .. } => SubmissionStatus::SubmissionFailed,
        }
    }
}

/// Submission state of a recorded verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Recorded, no attempt yet
    Pending,
    /// Confirmed on-chain
    Submitted,
    /// Completed in dry-run mode
    DryRun,
    /// Latest attempt failed
    SubmissionFailed,
}
