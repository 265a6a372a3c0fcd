//! Durable audit trail for verification verdicts.
//!
//! Verdicts and submission attempts are written to an append-only SQLite
//! store and echoed as structured `tracing` events. An optional per-attestation
//! JSON mirror can be enabled with [`AuditLog::with_export_dir`].

pub mod error;
pub mod export;
pub mod store;

pub use error::{AuditError, Result};
pub use export::{export_file_name, export_path};
pub use store::{
    AuditHealth, AuditLog, AuditMetrics, AuditedVerdict, DispatchFailure, SubmissionAttempt,
};
