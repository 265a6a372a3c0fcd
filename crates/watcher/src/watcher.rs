//! Event Watcher - Poll, Validate, Record, Submit
//!
//! A single logical worker. Each cycle fetches the attestation events after
//! the durable cursor and handles them one at a time in ledger order:
//!
//! 1. skip ids already seen by this process
//! 2. skip attestations the ledger already marks final
//! 3. resolve the reasoning document and validate it
//! 4. persist the verdict, then submit it
//!
//! Events that fail before a verdict is recorded are written to the audit
//! store as dispatch failures.
//!
//! After the batch the cursor is persisted and verdicts whose last
//! submission failed retryably are resubmitted unchanged, unless the ledger
//! shows an earlier transaction or another verdict already settled them.
//! Failed polls back
//! off exponentially; shutdown is observed between cycles and during the
//! inter-poll sleep.

use crate::backoff::Backoff;
use crate::client::{LedgerClient, LedgerError};
use crate::resolver::{ContentResolver, ResolveError};
use crate::submitter::{SubmissionReceipt, SubmitError, VerdictSubmitter};
use attest_audit::{AuditError, AuditLog};
use attest_core::{
    AttestationEvent, AttestationId, AttestationStatus, Cursor, RetryConfig, VerificationVerdict,
    VerifierConfig,
};
use attest_validator::ReasoningValidator;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Polling,
    Dispatching,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Cursor used when the audit store has none
    pub start_block: u64,
    pub max_submission_attempts: u32,
    pub retry: RetryConfig,
}

impl From<&VerifierConfig> for WatcherConfig {
    fn from(config: &VerifierConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            start_block: config.start_block,
            max_submission_attempts: config.max_submission_attempts,
            retry: config.retry.clone(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from(&VerifierConfig::default())
    }
}

/// Counters since the watcher was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub events_seen: u64,
    pub duplicates_skipped: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub resubmitted: u64,
    /// Verdicts found settled on-chain during the resubmission sweep
    pub reconciled: u64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Resolution(#[from] ResolveError),

    #[error("{0}")]
    Audit(#[from] AuditError),

    #[error("{0}")]
    Submission(#[from] SubmitError),
}

impl DispatchError {
    /// Stable label for the `failure` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Resolution(_) => "resolution",
            DispatchError::Audit(_) => "audit",
            DispatchError::Submission(_) => "submission",
        }
    }
}

/// How a dispatched event was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted(SubmissionReceipt),
    /// The ledger already holds a verdict for this attestation
    AlreadyFinal(AttestationStatus),
    /// The audit store already holds a verdict (redelivery after restart)
    AlreadyRecorded,
}

pub struct Watcher<C, R> {
    client: Arc<C>,
    resolver: R,
    validator: ReasoningValidator,
    audit: AuditLog,
    submitter: VerdictSubmitter<C>,
    config: WatcherConfig,
    cursor: Cursor,
    processed: HashSet<AttestationId>,
    backoff: Backoff,
    state: WatcherState,
    stats: WatcherStats,
}

impl<C: LedgerClient, R: ContentResolver> Watcher<C, R> {
    /// Build a watcher resuming from the cursor persisted in `audit`.
    pub fn new(
        client: Arc<C>,
        resolver: R,
        audit: AuditLog,
        submitter: VerdictSubmitter<C>,
        config: WatcherConfig,
    ) -> Result<Self, AuditError> {
        let cursor = audit
            .load_cursor()?
            .unwrap_or(Cursor(config.start_block));
        let backoff = Backoff::from_config(&config.retry);

        Ok(Self {
            client,
            resolver,
            validator: ReasoningValidator::default(),
            audit,
            submitter,
            config,
            cursor,
            processed: HashSet::new(),
            backoff,
            state: WatcherState::Idle,
            stats: WatcherStats::default(),
        })
    }

    pub fn with_validator(mut self, validator: ReasoningValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Advisory authorization check. The result is logged, never enforced.
    pub async fn startup_check(&self) -> Option<bool> {
        let verifier = self.submitter.verifier_address();
        match self.client.is_authorized_verifier(verifier).await {
            Ok(true) => {
                info!(verifier = %verifier, "Verifier is authorized");
                Some(true)
            }
            Ok(false) => {
                warn!(
                    verifier = %verifier,
                    "Verifier is not authorized; verdict transactions may be rejected"
                );
                Some(false)
            }
            Err(e) => {
                warn!(verifier = %verifier, error = %e, "Authorization check failed");
                None
            }
        }
    }

    /// One full cycle: fetch, dispatch, persist cursor, resubmission sweep.
    ///
    /// Returns the number of new events handled; `Err` only when the fetch
    /// itself failed.
    pub async fn poll_once(&mut self) -> Result<usize, LedgerError> {
        self.state = WatcherState::Polling;
        self.stats.polls += 1;

        let batch = match self.client.fetch_events(self.cursor).await {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.poll_failures += 1;
                self.state = WatcherState::Idle;
                return Err(e);
            }
        };

        debug!(
            cursor = %self.cursor,
            next_cursor = %batch.cursor,
            events = batch.events.len(),
            "Fetched attestation events"
        );

        self.state = WatcherState::Dispatching;
        let mut handled = HashSet::new();

        for event in &batch.events {
            self.stats.events_seen += 1;
            if !self.processed.insert(event.id) {
                self.stats.duplicates_skipped += 1;
                continue;
            }
            handled.insert(event.id);

            match self.dispatch(event).await {
                Ok(outcome) => {
                    self.stats.dispatched += 1;
                    debug!(attestation_id = %event.id, outcome = ?outcome, "Event dispatched");
                }
                Err(e) => {
                    self.stats.dispatch_failures += 1;
                    warn!(
                        attestation_id = %event.id,
                        failure = e.kind(),
                        error = %e,
                        "Dispatch failed"
                    );
                    // Submission failures already have an attempt row.
                    if !matches!(e, DispatchError::Submission(_)) {
                        if let Err(audit_err) =
                            self.audit
                                .record_dispatch_failure(event, e.kind(), &e.to_string())
                        {
                            error!(
                                attestation_id = %event.id,
                                error = %audit_err,
                                "Failed to record dispatch failure"
                            );
                        }
                    }
                }
            }
        }

        if batch.cursor > self.cursor {
            self.cursor = batch.cursor;
            if let Err(e) = self.audit.store_cursor(self.cursor) {
                error!(cursor = %self.cursor, error = %e, "Failed to persist watcher cursor");
            }
        }

        self.resubmit_failed(&handled).await;

        self.state = WatcherState::Idle;
        Ok(handled.len())
    }

    /// Validate, record and submit a single event.
    pub async fn dispatch(
        &mut self,
        event: &AttestationEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.client.attestation_status(event.id).await {
            Ok(status) if status.is_final() => {
                info!(
                    attestation_id = %event.id,
                    status = ?status,
                    "Attestation already settled on-chain, skipping"
                );
                return Ok(DispatchOutcome::AlreadyFinal(status));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(attestation_id = %event.id, error = %e, "Status check failed, continuing");
            }
        }

        let document = self.resolver.resolve(&event.id).await?;
        let report = self.validator.validate_bytes(&document.bytes);
        let verdict = VerificationVerdict::from_report(event.id, report);

        info!(
            attestation_id = %event.id,
            agent = %event.agent,
            category = %event.category,
            passed = verdict.passed,
            score = verdict.score,
            reason = %verdict.reason,
            "Reasoning validated"
        );

        match self.audit.record_verdict(event, &verdict) {
            Ok(_) => {}
            Err(AuditError::DuplicateVerdict { .. }) => {
                info!(attestation_id = %event.id, "Verdict already recorded, skipping");
                return Ok(DispatchOutcome::AlreadyRecorded);
            }
            Err(e) => return Err(e.into()),
        }

        let receipt = self.submitter.submit(&verdict, &mut self.audit).await?;
        Ok(DispatchOutcome::Submitted(receipt))
    }

    /// Resubmit recorded verdicts whose last attempt failed retryably (or
    /// that were never attempted), skipping ids handled in this cycle.
    ///
    /// Each candidate is first reconciled against the ledger, so a late
    /// inclusion of an earlier transaction is recorded instead of sending a
    /// second verdict.
    pub async fn resubmit_failed(&mut self, skip: &HashSet<AttestationId>) -> usize {
        let max_attempts = self.config.max_submission_attempts;
        let candidates = match self.audit.retryable_failures(max_attempts) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to query retryable verdicts");
                return 0;
            }
        };

        let mut resubmitted = 0;
        for verdict in candidates {
            if skip.contains(&verdict.attestation_id) {
                continue;
            }
            let attempts = match self.audit.attempts(&verdict.attestation_id) {
                Ok(attempts) => attempts,
                Err(e) => {
                    error!(
                        attestation_id = %verdict.attestation_id,
                        error = %e,
                        "Failed to load submission attempts"
                    );
                    continue;
                }
            };
            let prior = attempts.len() as u32;
            let prior_tx = attempts.last().and_then(|a| a.outcome.tx_hash());

            match self
                .submitter
                .reconcile(&verdict, prior_tx, &mut self.audit)
                .await
            {
                Ok(Some(receipt)) => {
                    self.stats.reconciled += 1;
                    info!(
                        attestation_id = %verdict.attestation_id,
                        tx_hash = %receipt.tx_hash,
                        "Verdict settled on-chain without resubmission"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e @ (SubmitError::Reverted { .. } | SubmitError::AlreadyFinal { .. })) => {
                    error!(
                        attestation_id = %verdict.attestation_id,
                        error = %e,
                        "Verdict not settled by this verifier; manual intervention required"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        attestation_id = %verdict.attestation_id,
                        error = %e,
                        "Ledger state unavailable, deferring resubmission"
                    );
                    continue;
                }
            }

            match self.submitter.submit(&verdict, &mut self.audit).await {
                Ok(receipt) => {
                    resubmitted += 1;
                    self.stats.resubmitted += 1;
                    info!(
                        attestation_id = %verdict.attestation_id,
                        tx_hash = %receipt.tx_hash,
                        attempt = prior + 1,
                        "Verdict resubmitted"
                    );
                }
                Err(e) if !e.is_retryable() || prior + 1 >= max_attempts => {
                    error!(
                        attestation_id = %verdict.attestation_id,
                        attempts = prior + 1,
                        error = %e,
                        "Giving up on verdict submission; manual intervention required"
                    );
                }
                Err(e) => {
                    warn!(
                        attestation_id = %verdict.attestation_id,
                        attempt = prior + 1,
                        failure = "submission",
                        error = %e,
                        "Resubmission failed"
                    );
                }
            }
        }
        resubmitted
    }

    /// Poll until `shutdown` turns true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> WatcherStats {
        info!(
            cursor = %self.cursor,
            mode = ?self.submitter.mode(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Watcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(_) => {
                    self.backoff.reset();
                    self.config.poll_interval
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        consecutive_failures = self.backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Ledger poll failed"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state = WatcherState::Stopped;
        info!(
            cursor = %self.cursor,
            polls = self.stats.polls,
            dispatched = self.stats.dispatched,
            dispatch_failures = self.stats.dispatch_failures,
            resubmitted = self.stats.resubmitted,
            "Watcher stopped"
        );
        self.stats.clone()
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_processed(&self, attestation_id: &AttestationId) -> bool {
        self.processed.contains(attestation_id)
    }
}
