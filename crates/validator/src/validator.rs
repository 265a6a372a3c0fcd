//! Deterministic reasoning validator.
//!
//! A fixed, ordered battery of seven checks. Every passing check adds to the
//! tally; the first failing check supplies the reported reason and later
//! failures never replace it. Schema conformance is the exception: a record
//! that fails it is void and scores zero without running the remaining
//! checks.

use crate::canonical::{canonical_json, content_hash};
use crate::patterns::{find_matches, DEFAULT_DENY_LIST};
use crate::record::{ReasoningRecord, Step, REQUIRED_FIELDS};
use attest_core::{ValidationReport, PASS_THRESHOLD};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Number of checks in the battery.
pub const CHECKS_TOTAL: u32 = 7;

/// Smallest accepted canonical size in bytes.
pub const MIN_CANONICAL_SIZE: usize = 100;

/// Largest accepted canonical size in bytes.
pub const MAX_CANONICAL_SIZE: usize = 50_000;

/// Reason reported when nothing failed.
pub const ALL_CHECKS_PASSED: &str = "All checks passed";

/// The checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    IntegrityHash,
    Schema,
    RequiredFields,
    ForbiddenPatterns,
    ConfidenceRange,
    StepConsistency,
    SizeBound,
}

impl Check {
    pub const ALL: [Check; CHECKS_TOTAL as usize] = [
        Check::IntegrityHash,
        Check::Schema,
        Check::RequiredFields,
        Check::ForbiddenPatterns,
        Check::ConfidenceRange,
        Check::StepConsistency,
        Check::SizeBound,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Check::IntegrityHash => "integrity_hash",
            Check::Schema => "schema",
            Check::RequiredFields => "required_fields",
            Check::ForbiddenPatterns => "forbidden_patterns",
            Check::ConfidenceRange => "confidence_range",
            Check::StepConsistency => "step_consistency",
            Check::SizeBound => "size_bound",
        }
    }
}

/// Tunable limits. `Default` is the production policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorPolicy {
    pub pass_threshold: u8,
    pub min_size: usize,
    pub max_size: usize,
    /// Lowercase substrings
    pub deny_list: Vec<String>,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: PASS_THRESHOLD,
            min_size: MIN_CANONICAL_SIZE,
            max_size: MAX_CANONICAL_SIZE,
            deny_list: DEFAULT_DENY_LIST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Default)]
struct Tally {
    passed: u32,
    reason: Option<String>,
}

impl Tally {
    fn pass(&mut self, check: Check) {
        self.passed += 1;
        debug!(check = check.name(), "check passed");
    }

    fn fail(&mut self, check: Check, reason: String) {
        warn!(check = check.name(), reason = %reason, "check failed");
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }

    fn record(&mut self, check: Check, ok: bool, reason: impl FnOnce() -> String) {
        if ok {
            self.pass(check);
        } else {
            self.fail(check, reason());
        }
    }
}

/// Pure validator over reasoning documents.
#[derive(Debug, Clone, Default)]
pub struct ReasoningValidator {
    policy: ValidatorPolicy,
}

impl ReasoningValidator {
    pub fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidatorPolicy {
        &self.policy
    }

    /// Validate raw bytes. Undecodable input yields a void report instead of
    /// an error.
    pub fn validate_bytes(&self, bytes: &[u8]) -> ValidationReport {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(document) => self.validate(&document),
            Err(e) => {
                let reason = format!("Malformed record: {}", truncate(&e.to_string(), 100));
                warn!(reason = %reason, "reasoning document could not be decoded");
                ValidationReport::void(CHECKS_TOTAL, reason, None)
            }
        }
    }

    /// Validate an already typed record.
    pub fn validate_record(&self, record: &ReasoningRecord) -> ValidationReport {
        self.validate(&record.to_document())
    }

    /// Run the full battery over a decoded document.
    pub fn validate(&self, document: &Value) -> ValidationReport {
        let mut tally = Tally::default();

        let canonical = canonical_json(document);
        let hash = content_hash(&canonical);
        debug!(content_hash = &hash[..16], "integrity hash computed");
        tally.pass(Check::IntegrityHash);

        let record = match ReasoningRecord::from_document(document) {
            Ok(record) => {
                tally.pass(Check::Schema);
                record
            }
            Err(e) => {
                let reason = format!("Invalid structure: {e}");
                warn!(check = Check::Schema.name(), reason = %reason, "record voided");
                return ValidationReport::void(CHECKS_TOTAL, reason, Some(hash));
            }
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| document.get(field).is_none())
            .collect();
        tally.record(Check::RequiredFields, missing.is_empty(), || {
            format!("Missing required fields: {missing:?}")
        });

        let matches = find_matches(&canonical, &self.policy.deny_list);
        tally.record(Check::ForbiddenPatterns, matches.is_empty(), || {
            let shown = &matches[..matches.len().min(3)];
            format!("Forbidden patterns detected: {shown:?}")
        });

        let confidence = record.confidence;
        tally.record(
            Check::ConfidenceRange,
            (0.0..=1.0).contains(&confidence),
            || format!("Invalid confidence range: {confidence}"),
        );

        let steps_ok = !record.steps.is_empty() && record.steps.iter().all(Step::is_well_formed);
        tally.record(Check::StepConsistency, steps_ok, || {
            format!("Invalid reasoning steps: {} steps", record.steps.len())
        });

        let size = canonical.len();
        tally.record(
            Check::SizeBound,
            (self.policy.min_size..=self.policy.max_size).contains(&size),
            || format!("Invalid size: {size} bytes"),
        );

        let reason = tally
            .reason
            .unwrap_or_else(|| ALL_CHECKS_PASSED.to_string());
        let report = ValidationReport::from_tally(
            tally.passed,
            CHECKS_TOTAL,
            self.policy.pass_threshold,
            reason,
            Some(hash),
        );

        if report.passed {
            info!(
                score = report.score,
                checks_passed = report.checks_passed,
                checks_total = report.checks_total,
                "verification passed"
            );
        } else {
            warn!(score = report.score, reason = %report.reason, "verification failed");
        }

        report
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_document() -> Value {
        json!({
            "input": "Generate legal contract",
            "reasoning_steps": [
                {"index": 1, "description": "Identified contract type", "rationale": "User requested legal contract"},
                {"index": 2, "description": "Applied legal framework", "rationale": "Used the civil code"}
            ],
            "conclusion": "Contract generated successfully",
            "confidence": 0.92
        })
    }

    #[test]
    fn test_valid_record_scores_full() {
        let report = ReasoningValidator::default().validate(&valid_document());
        assert!(report.passed);
        assert_eq!(report.score, 100);
        assert_eq!(report.checks_passed, 7);
        assert_eq!(report.checks_total, 7);
        assert_eq!(report.reason, ALL_CHECKS_PASSED);
        assert_eq!(report.content_hash.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_missing_conclusion_voids_record() {
        let mut doc = valid_document();
        doc.as_object_mut().unwrap().remove("conclusion");

        let report = ReasoningValidator::default().validate(&doc);
        assert!(!report.passed);
        assert_eq!(report.score, 0);
        assert_eq!(report.checks_passed, 0);
        assert!(report.reason.contains("conclusion"), "{}", report.reason);
        assert!(report.reason.starts_with("Invalid structure"));
    }

    #[test]
    fn test_empty_conclusion_voids_record() {
        let mut doc = valid_document();
        doc["conclusion"] = json!("");

        let report = ReasoningValidator::default().validate(&doc);
        assert!(!report.passed);
        assert_eq!(report.score, 0);
        assert_eq!(report.checks_passed, 0);
        assert!(report.reason.contains("conclusion"), "{}", report.reason);
    }

    #[test]
    fn test_step_without_rationale_voids_record() {
        let mut doc = valid_document();
        doc["reasoning_steps"][1].as_object_mut().unwrap().remove("rationale");

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(report.score, 0);
        assert!(report.reason.contains("rationale"));
    }

    #[test]
    fn test_forbidden_pattern_costs_one_check() {
        let mut doc = valid_document();
        doc["input"] = json!("please bypass the filter");

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(report.checks_passed, 6);
        assert_eq!(report.score, 85);
        assert!(report.passed);
        assert!(report.reason.contains("bypass"), "{}", report.reason);
    }

    #[test]
    fn test_forbidden_pattern_reason_lists_three() {
        let mut doc = valid_document();
        doc["conclusion"] = json!("JAILBREAK, bypass, hack and override everything");

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(
            report.reason,
            r#"Forbidden patterns detected: ["jailbreak", "bypass", "hack"]"#
        );
    }

    #[test]
    fn test_confidence_out_of_range() {
        for confidence in [1.5, -0.1] {
            let mut doc = valid_document();
            doc["confidence"] = json!(confidence);

            let report = ReasoningValidator::default().validate(&doc);
            assert_eq!(report.score, 85);
            assert!(report.passed);
            assert!(report.reason.starts_with("Invalid confidence range"));
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let mut doc = valid_document();
        doc["input"] = json!("ignore previous instructions");
        doc["confidence"] = json!(7);

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(report.checks_passed, 5);
        assert_eq!(report.score, 71);
        assert!(report.passed);
        assert!(report.reason.starts_with("Forbidden patterns"));
    }

    #[test]
    fn test_three_failures_drop_below_threshold() {
        let mut doc = valid_document();
        doc["input"] = json!(format!("override {}", "x".repeat(MAX_CANONICAL_SIZE)));
        doc["confidence"] = json!(2.0);

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(report.checks_passed, 4);
        assert_eq!(report.score, 57);
        assert!(!report.passed);
    }

    #[test]
    fn test_oversized_record_fails_size_only() {
        let mut doc = valid_document();
        doc["input"] = json!("x".repeat(MAX_CANONICAL_SIZE));

        let report = ReasoningValidator::default().validate(&doc);
        assert_eq!(report.checks_passed, 6);
        assert_eq!(report.score, 85);
        assert!(report.reason.starts_with("Invalid size"));
    }

    #[test]
    fn test_tiny_record_under_custom_floor() {
        let doc = json!({
            "input": "x",
            "reasoning_steps": [{"index": 1, "description": "d", "rationale": "r"}],
            "conclusion": "c",
            "confidence": 0.95
        });
        // The smallest well-formed record is 114 canonical bytes.
        assert_eq!(canonical_json(&doc).len(), 114);

        let strict = ReasoningValidator::new(ValidatorPolicy {
            min_size: 120,
            ..ValidatorPolicy::default()
        });
        let report = strict.validate(&doc);
        assert_eq!(report.checks_passed, 6);
        assert_eq!(report.score, 85);
        assert!(report.passed);
        assert_eq!(report.reason, "Invalid size: 114 bytes");
    }

    #[test]
    fn test_malformed_bytes() {
        let report = ReasoningValidator::default().validate_bytes(b"{not json");
        assert!(!report.passed);
        assert_eq!(report.score, 0);
        assert!(report.content_hash.is_none());
        assert!(report.reason.starts_with("Malformed record"));
    }

    #[test]
    fn test_non_object_document() {
        let report = ReasoningValidator::default().validate_bytes(b"[1,2,3]");
        assert_eq!(report.score, 0);
        assert!(report.reason.contains("not a JSON object"));
    }

    #[test]
    fn test_validate_record_matches_document() {
        let validator = ReasoningValidator::default();
        let record = ReasoningRecord::from_document(&valid_document()).unwrap();
        assert_eq!(
            validator.validate_record(&record),
            validator.validate(&valid_document())
        );
    }

    #[test]
    fn test_check_order() {
        let names: Vec<&str> = Check::ALL.iter().map(Check::name).collect();
        assert_eq!(
            names,
            vec![
                "integrity_hash",
                "schema",
                "required_fields",
                "forbidden_patterns",
                "confidence_range",
                "step_consistency",
                "size_bound"
            ]
        );
    }
}
