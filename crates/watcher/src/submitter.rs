//! Verdict Submitter - On-Chain Write-Back
//!
//! Turns a [`VerificationVerdict`] into a signed verdict transaction, sends
//! it and waits for inclusion. In dry-run mode nothing leaves the process
//! and the all-zero transaction hash is reported.
//!
//! Every call to [`VerdictSubmitter::submit`] appends exactly one attempt to
//! the audit store, whatever the outcome.

use crate::client::{LedgerClient, LedgerError, VerdictTransaction};
use crate::credential::VerifierCredential;
use attest_audit::{AuditError, AuditLog};
use attest_core::{
    Address, AttestationId, AttestationStatus, SubmissionOutcome, TxHash, VerificationVerdict,
    VerifierConfig,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Attestation contract receiving verdicts
    pub contract: Address,
    pub gas_limit: u64,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Block explorer base URL; confirmed transactions are logged as links
    pub explorer_url: Option<String>,
}

impl SubmitterConfig {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            gas_limit: 200_000,
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            explorer_url: None,
        }
    }

    /// Submission settings from the verifier configuration.
    pub fn from_verifier_config(config: &VerifierConfig, contract: Address) -> Self {
        Self {
            contract,
            gas_limit: config.gas_limit,
            confirmation_timeout: config.confirmation_timeout(),
            receipt_poll_interval: config.receipt_poll_interval(),
            explorer_url: config.explorer_url.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Ledger query failed: {0}")]
    Ledger(LedgerError),

    #[error("Failed to send verdict transaction: {0}")]
    Send(LedgerError),

    #[error("Transaction {tx_hash} not confirmed within {waited:?}")]
    ConfirmationTimeout { tx_hash: TxHash, waited: Duration },

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },

    #[error("Attestation already final on-chain ({status:?})")]
    AlreadyFinal { status: AttestationStatus },

    #[error("Audit store error: {0}")]
    Audit(#[from] AuditError),
}

impl SubmitError {
    /// Whether resubmitting the same verdict later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmitError::Ledger(e) | SubmitError::Send(e) => e.is_transient(),
            SubmitError::ConfirmationTimeout { .. } => true,
            SubmitError::Reverted { .. }
            | SubmitError::AlreadyFinal { .. }
            | SubmitError::Audit(_) => false,
        }
    }

    fn outcome(&self) -> SubmissionOutcome {
        match self {
            SubmitError::Reverted { tx_hash } => SubmissionOutcome::Reverted { tx_hash: *tx_hash },
            SubmitError::ConfirmationTimeout { tx_hash, .. } => SubmissionOutcome::Unconfirmed {
                tx_hash: *tx_hash,
                error: self.to_string(),
            },
            other => SubmissionOutcome::Failed {
                error: other.to_string(),
                retryable: other.is_retryable(),
            },
        }
    }
}

/// Successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub attestation_id: AttestationId,
    pub passed: bool,
    pub score: u8,
    pub tx_hash: TxHash,
    /// Inclusion block; `None` in dry-run
    pub block_number: Option<u64>,
    pub dry_run: bool,
}

impl SubmissionReceipt {
    fn outcome(&self) -> SubmissionOutcome {
        if self.dry_run {
            SubmissionOutcome::DryRun {
                tx_hash: self.tx_hash,
            }
        } else {
            SubmissionOutcome::Confirmed {
                tx_hash: self.tx_hash,
            }
        }
    }
}

pub struct VerdictSubmitter<C> {
    client: Arc<C>,
    credential: VerifierCredential,
    config: SubmitterConfig,
    mode: SubmitMode,
    next_nonce: Option<u64>,
    chain_id: Option<u64>,
}

impl<C: LedgerClient> VerdictSubmitter<C> {
    pub fn new(
        client: Arc<C>,
        credential: VerifierCredential,
        config: SubmitterConfig,
        mode: SubmitMode,
    ) -> Self {
        Self {
            client,
            credential,
            config,
            mode,
            next_nonce: None,
            chain_id: None,
        }
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    pub fn verifier_address(&self) -> Address {
        self.credential.address()
    }

    /// Submit `verdict` and record the attempt in `audit`.
    pub async fn submit(
        &mut self,
        verdict: &VerificationVerdict,
        audit: &mut AuditLog,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let result = match self.mode {
            SubmitMode::DryRun => Ok(self.dry_run(verdict)),
            SubmitMode::Live => self.submit_live(verdict).await,
        };

        let outcome = match &result {
            Ok(receipt) => receipt.outcome(),
            Err(e) => e.outcome(),
        };
        audit.record_attempt(
            &verdict.attestation_id,
            &outcome,
            self.mode == SubmitMode::DryRun,
        )?;

        result
    }

    /// Settle `verdict` from ledger state instead of sending it again.
    ///
    /// An earlier transaction `prior` may have been included after its
    /// confirmation timed out, or the attestation may already be final. In
    /// either case the outcome is recorded in `audit` and returned. `Ok(None)`
    /// means nothing has settled and a fresh submission is needed. Nothing is
    /// recorded when the ledger cannot be queried.
    pub async fn reconcile(
        &self,
        verdict: &VerificationVerdict,
        prior: Option<TxHash>,
        audit: &mut AuditLog,
    ) -> Result<Option<SubmissionReceipt>, SubmitError> {
        if self.mode == SubmitMode::DryRun {
            return Ok(None);
        }
        let id = verdict.attestation_id;

        if let Some(tx_hash) = prior {
            let receipt = self
                .client
                .transaction_receipt(tx_hash)
                .await
                .map_err(SubmitError::Ledger)?;
            if let Some(receipt) = receipt {
                if !receipt.succeeded() {
                    audit.record_attempt(&id, &SubmissionOutcome::Reverted { tx_hash }, false)?;
                    return Err(SubmitError::Reverted { tx_hash });
                }
                info!(
                    attestation_id = %id,
                    tx_hash = %tx_hash,
                    block_number = receipt.block_number,
                    "Earlier verdict transaction confirmed late"
                );
                return self
                    .settled(verdict, tx_hash, Some(receipt.block_number), audit)
                    .map(Some);
            }
        }

        let status = self
            .client
            .attestation_status(id)
            .await
            .map_err(SubmitError::Ledger)?;
        if !status.is_final() {
            return Ok(None);
        }

        match prior {
            Some(tx_hash) => {
                warn!(
                    attestation_id = %id,
                    tx_hash = %tx_hash,
                    status = ?status,
                    "Attestation final on-chain before its receipt was seen"
                );
                self.settled(verdict, tx_hash, None, audit).map(Some)
            }
            None => {
                let outcome = SubmissionOutcome::Failed {
                    error: format!("attestation already final on-chain ({status:?}); not resent"),
                    retryable: false,
                };
                audit.record_attempt(&id, &outcome, false)?;
                warn!(
                    attestation_id = %id,
                    status = ?status,
                    "Attestation settled without a known transaction; not resending"
                );
                Err(SubmitError::AlreadyFinal { status })
            }
        }
    }

    fn settled(
        &self,
        verdict: &VerificationVerdict,
        tx_hash: TxHash,
        block_number: Option<u64>,
        audit: &mut AuditLog,
    ) -> Result<SubmissionReceipt, SubmitError> {
        audit.record_attempt(
            &verdict.attestation_id,
            &SubmissionOutcome::Confirmed { tx_hash },
            false,
        )?;
        Ok(SubmissionReceipt {
            attestation_id: verdict.attestation_id,
            passed: verdict.passed,
            score: verdict.score,
            tx_hash,
            block_number,
            dry_run: false,
        })
    }

    fn dry_run(&self, verdict: &VerificationVerdict) -> SubmissionReceipt {
        info!(
            attestation_id = %verdict.attestation_id,
            passed = verdict.passed,
            score = verdict.score,
            "Dry run: verdict not sent"
        );
        SubmissionReceipt {
            attestation_id: verdict.attestation_id,
            passed: verdict.passed,
            score: verdict.score,
            tx_hash: TxHash::zero(),
            block_number: None,
            dry_run: true,
        }
    }

    async fn submit_live(
        &mut self,
        verdict: &VerificationVerdict,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let chain_id = match self.chain_id {
            Some(id) => id,
            None => {
                let id = self.client.chain_id().await.map_err(SubmitError::Ledger)?;
                self.chain_id = Some(id);
                id
            }
        };

        let nonce = match self.next_nonce {
            Some(nonce) => nonce,
            None => self
                .client
                .transaction_count(self.credential.address())
                .await
                .map_err(SubmitError::Ledger)?,
        };

        let signed = VerdictTransaction {
            to: self.config.contract,
            attestation_id: verdict.attestation_id,
            passed: verdict.passed,
            score: verdict.score,
            nonce,
            gas_limit: self.config.gas_limit,
            chain_id,
        }
        .sign(&self.credential);

        let tx_hash = match self.client.send_transaction(&signed).await {
            Ok(hash) => {
                self.next_nonce = Some(nonce + 1);
                hash
            }
            Err(e) => {
                // Re-read on the next attempt; the ledger may or may not
                // have consumed this nonce.
                self.next_nonce = None;
                return Err(SubmitError::Send(e));
            }
        };

        info!(
            attestation_id = %verdict.attestation_id,
            tx_hash = %tx_hash,
            nonce,
            "Verdict transaction sent"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.succeeded() {
            return Err(SubmitError::Reverted { tx_hash });
        }

        if let Some(base) = &self.config.explorer_url {
            info!(
                attestation_id = %verdict.attestation_id,
                "Explorer: {}/tx/{}",
                base.trim_end_matches('/'),
                tx_hash
            );
        }

        Ok(SubmissionReceipt {
            attestation_id: verdict.attestation_id,
            passed: verdict.passed,
            score: verdict.score,
            tx_hash,
            block_number: Some(receipt.block_number),
            dry_run: false,
        })
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<crate::client::TransactionReceipt, SubmitError> {
        let started = Instant::now();
        let deadline = started + self.config.confirmation_timeout;

        loop {
            match self.client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(
                        tx_hash = %tx_hash,
                        block_number = receipt.block_number,
                        "Receipt received"
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt query failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SubmitError::ConfirmationTimeout {
                    tx_hash,
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.config.receipt_poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use attest_core::{AttestationEvent, SubmissionStatus};
    use std::path::PathBuf;

    const CHAIN_ID: u64 = 31337;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("submitter_{}.db", uuid::Uuid::new_v4()))
    }

    fn recorded(audit: &mut AuditLog, seed: u8) -> VerificationVerdict {
        let id = AttestationId([seed; 32]);
        let verdict = VerificationVerdict {
            attestation_id: id,
            passed: true,
            score: 100,
            reason: "All checks passed".to_string(),
            checks_passed: 7,
            checks_total: 7,
            content_hash: None,
        };
        let event = AttestationEvent {
            id,
            agent: Address([3; 20]),
            category: "reasoning".to_string(),
            observed_at: 0,
            block_number: seed as u64,
        };
        audit.record_verdict(&event, &verdict).unwrap();
        verdict
    }

    fn submitter(ledger: &MemoryLedger, mode: SubmitMode) -> VerdictSubmitter<MemoryLedger> {
        let mut config = SubmitterConfig::new(Address([0xcc; 20]));
        config.confirmation_timeout = Duration::from_millis(200);
        config.receipt_poll_interval = Duration::from_millis(10);
        VerdictSubmitter::new(
            Arc::new(ledger.clone()),
            VerifierCredential::from_bytes(&[4u8; 32]).unwrap(),
            config,
            mode,
        )
    }

    #[tokio::test]
    async fn test_dry_run_returns_zero_hash() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        let mut submitter = submitter(&ledger, SubmitMode::DryRun);
        let verdict = recorded(&mut audit, 1);

        let receipt = submitter.submit(&verdict, &mut audit).await.unwrap();
        assert!(receipt.dry_run);
        assert_eq!(receipt.tx_hash, TxHash::zero());
        assert!(ledger.sent_transactions().is_empty());
        assert_eq!(
            audit.status(&verdict.attestation_id).unwrap(),
            Some(SubmissionStatus::DryRun)
        );

        std::fs::remove_file(db_path).ok();
    }

    #[tokio::test]
    async fn test_live_submission_confirms() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        let mut submitter = submitter(&ledger, SubmitMode::Live);
        let verdict = recorded(&mut audit, 1);

        let receipt = submitter.submit(&verdict, &mut audit).await.unwrap();
        assert!(!receipt.dry_run);
        assert!(receipt.block_number.is_some());

        let sent = ledger.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].transaction.gas_limit, 200_000);
        assert_eq!(sent[0].transaction.chain_id, CHAIN_ID);
        assert_eq!(sent[0].signer, submitter.verifier_address());

        let attempts = audit.attempts(&verdict.attestation_id).unwrap();
        assert_eq!(
            attempts[0].outcome,
            SubmissionOutcome::Confirmed {
                tx_hash: receipt.tx_hash
            }
        );

        std::fs::remove_file(db_path).ok();
    }

    #[tokio::test]
    async fn test_nonce_cached_and_reread_after_send_failure() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        let mut submitter = submitter(&ledger, SubmitMode::Live);

        let first = recorded(&mut audit, 1);
        let second = recorded(&mut audit, 2);

        submitter.submit(&first, &mut audit).await.unwrap();

        ledger.fail_next_sends(1);
        let err = submitter.submit(&second, &mut audit).await.unwrap_err();
        assert!(matches!(err, SubmitError::Send(_)));
        assert!(err.is_retryable());

        submitter.submit(&second, &mut audit).await.unwrap();

        let nonces: Vec<u64> = ledger
            .sent_transactions()
            .iter()
            .map(|tx| tx.transaction.nonce)
            .collect();
        assert_eq!(nonces, vec![0, 1]);
        assert_eq!(audit.attempts(&second.attestation_id).unwrap().len(), 2);

        std::fs::remove_file(db_path).ok();
    }

    #[tokio::test]
    async fn test_confirmation_timeout() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        ledger.withhold_receipts(true);
        let mut submitter = submitter(&ledger, SubmitMode::Live);
        let verdict = recorded(&mut audit, 1);

        let err = submitter.submit(&verdict, &mut audit).await.unwrap_err();
        assert!(matches!(err, SubmitError::ConfirmationTimeout { .. }));
        assert!(err.is_retryable());

        let sent_hash = ledger.sent_transactions()[0].tx_hash();
        let attempts = audit.attempts(&verdict.attestation_id).unwrap();
        assert!(matches!(
            attempts[0].outcome,
            SubmissionOutcome::Unconfirmed { tx_hash, .. } if tx_hash == sent_hash
        ));

        std::fs::remove_file(db_path).ok();
    }

    #[tokio::test]
    async fn test_reconcile_picks_up_late_confirmation() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        ledger.withhold_receipts(true);
        let mut submitter = submitter(&ledger, SubmitMode::Live);
        let verdict = recorded(&mut audit, 1);

        submitter.submit(&verdict, &mut audit).await.unwrap_err();
        let prior = audit.attempts(&verdict.attestation_id).unwrap()[0]
            .outcome
            .tx_hash();

        // Still unmined: nothing settles and nothing is recorded.
        assert_eq!(
            submitter.reconcile(&verdict, prior, &mut audit).await.unwrap(),
            None
        );
        assert_eq!(audit.attempts(&verdict.attestation_id).unwrap().len(), 1);

        ledger.withhold_receipts(false);
        let receipt = submitter
            .reconcile(&verdict, prior, &mut audit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(receipt.tx_hash), prior);
        assert!(receipt.block_number.is_some());
        assert_eq!(ledger.sent_transactions().len(), 1);
        assert_eq!(
            audit.status(&verdict.attestation_id).unwrap(),
            Some(SubmissionStatus::Submitted)
        );

        std::fs::remove_file(db_path).ok();
    }

    #[tokio::test]
    async fn test_reconcile_stops_on_final_attestation() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        let submitter = submitter(&ledger, SubmitMode::Live);
        let verdict = recorded(&mut audit, 1);
        ledger.set_status(verdict.attestation_id, AttestationStatus::Rejected);

        let err = submitter
            .reconcile(&verdict, None, &mut audit)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::AlreadyFinal {
                status: AttestationStatus::Rejected
            }
        ));
        assert!(!err.is_retryable());
        assert!(ledger.sent_transactions().is_empty());
        assert!(audit.retryable_failures(5).unwrap().is_empty());

        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_only_transient_ledger_errors_are_retryable() {
        let transport = SubmitError::Send(LedgerError::Transport("connection reset".to_string()));
        assert!(transport.is_retryable());

        let rejected = SubmitError::Send(LedgerError::Rejected("invalid signature".to_string()));
        assert!(!rejected.is_retryable());
        assert!(matches!(
            rejected.outcome(),
            SubmissionOutcome::Failed {
                retryable: false,
                ..
            }
        ));

        let busy = SubmitError::Ledger(LedgerError::Http {
            status: 503,
            body: String::new(),
        });
        assert!(busy.is_retryable());
    }

    #[tokio::test]
    async fn test_revert_is_terminal() {
        let db_path = temp_db();
        let mut audit = AuditLog::open(&db_path, "0xverifier").unwrap();
        let ledger = MemoryLedger::new(CHAIN_ID);
        ledger.revert_verdicts_for(AttestationId([1; 32]));
        let mut submitter = submitter(&ledger, SubmitMode::Live);
        let verdict = recorded(&mut audit, 1);

        let err = submitter.submit(&verdict, &mut audit).await.unwrap_err();
        assert!(matches!(err, SubmitError::Reverted { .. }));
        assert!(!err.is_retryable());
        assert!(audit.retryable_failures(5).unwrap().is_empty());

        std::fs::remove_file(db_path).ok();
    }
}
