//! Core types for the attestation verifier.
//!
//! This crate provides the identifiers, verdict model, configuration and
//! logging setup shared by the validator, audit store and watcher crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
pub mod verdict;

pub use config::{ConfigError, RetryConfig, VerifierConfig};
pub use error::{CoreError, Result};
pub use logging::LogFormat;
pub use types::{Address, AttestationEvent, AttestationId, AttestationStatus, Cursor, TxHash};
pub use verdict::{
    score_for, SubmissionOutcome, SubmissionStatus, ValidationReport, VerificationVerdict,
    PASS_THRESHOLD,
};
