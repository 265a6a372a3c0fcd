//! Tier-1 deterministic validation of agent reasoning records.
//!
//! No network, clock or storage access: the same document always yields
//! the same report.

pub mod canonical;
pub mod patterns;
pub mod record;
pub mod validator;

pub use canonical::{canonical_json, content_hash};
pub use patterns::DEFAULT_DENY_LIST;
pub use record::{ReasoningRecord, SchemaError, Step, REQUIRED_FIELDS};
pub use validator::{
    Check, ReasoningValidator, ValidatorPolicy, ALL_CHECKS_PASSED, CHECKS_TOTAL,
    MAX_CANONICAL_SIZE, MIN_CANONICAL_SIZE,
};
