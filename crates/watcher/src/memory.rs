//! In-process ledger used by tests and local runs.
//!
//! Clones share state, so a test can keep a handle to inspect sent
//! transactions and inject failures while the watcher owns another.

use crate::client::{
    EventBatch, LedgerClient, LedgerError, ReceiptStatus, SignedVerdictTransaction,
    TransactionReceipt,
};
use attest_core::{Address, AttestationEvent, AttestationId, AttestationStatus, Cursor, TxHash};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
    chain_id: u64,
    events: Vec<AttestationEvent>,
    statuses: HashMap<AttestationId, AttestationStatus>,
    authorized: HashSet<Address>,
    nonces: HashMap<Address, u64>,
    sent: Vec<SignedVerdictTransaction>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    unmined: Vec<SignedVerdictTransaction>,
    reverting: HashSet<AttestationId>,
    withhold_receipts: bool,
    failing_fetches: u32,
    failing_sends: u32,
    rejecting_sends: u32,
    fetch_calls: u64,
}

/// Scripted [`LedgerClient`] backed by shared in-memory state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new(chain_id: u64) -> Self {
        let ledger = Self::default();
        ledger.lock().chain_id = chain_id;
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Emit an attestation event at `event.block_number`.
    pub fn push_event(&self, event: AttestationEvent) {
        let mut state = self.lock();
        state
            .statuses
            .entry(event.id)
            .or_insert(AttestationStatus::Pending);
        state.events.push(event);
    }

    pub fn set_status(&self, attestation_id: AttestationId, status: AttestationStatus) {
        self.lock().statuses.insert(attestation_id, status);
    }

    pub fn authorize(&self, verifier: Address) {
        self.lock().authorized.insert(verifier);
    }

    /// The next `count` calls to `fetch_events` fail with a transport error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().failing_fetches = count;
    }

    /// The next `count` calls to `send_transaction` fail with a transport
    /// error before the nonce is consumed.
    pub fn fail_next_sends(&self, count: u32) {
        self.lock().failing_sends = count;
    }

    /// The next `count` calls to `send_transaction` are refused by the
    /// ledger.
    pub fn reject_next_sends(&self, count: u32) {
        self.lock().rejecting_sends = count;
    }

    /// Verdict transactions for this attestation are included with a
    /// failure status.
    pub fn revert_verdicts_for(&self, attestation_id: AttestationId) {
        self.lock().reverting.insert(attestation_id);
    }

    /// While set, accepted transactions stay unmined. Clearing it mines
    /// them in send order.
    pub fn withhold_receipts(&self, withhold: bool) {
        let mut state = self.lock();
        state.withhold_receipts = withhold;
        if !withhold {
            let unmined = std::mem::take(&mut state.unmined);
            for transaction in &unmined {
                Self::mine(&mut state, transaction);
            }
        }
    }

    pub fn sent_transactions(&self) -> Vec<SignedVerdictTransaction> {
        self.lock().sent.clone()
    }

    pub fn status_of(&self, attestation_id: &AttestationId) -> AttestationStatus {
        self.lock()
            .statuses
            .get(attestation_id)
            .copied()
            .unwrap_or(AttestationStatus::Unknown)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.lock().fetch_calls
    }

    /// Include `transaction`. A verdict for an attestation that is already
    /// final fails, as the contract accepts one verdict per attestation.
    fn mine(state: &mut LedgerState, transaction: &SignedVerdictTransaction) {
        let id = transaction.transaction.attestation_id;
        let already_final = state
            .statuses
            .get(&id)
            .is_some_and(|status| status.is_final());

        let status = if already_final || state.reverting.contains(&id) {
            ReceiptStatus::Failure
        } else {
            let verdict = if transaction.transaction.passed {
                AttestationStatus::Verified
            } else {
                AttestationStatus::Rejected
            };
            state.statuses.insert(id, verdict);
            ReceiptStatus::Success
        };

        let tx_hash = transaction.tx_hash();
        let block_number = Self::head(state) + 1;
        state.receipts.insert(
            tx_hash,
            TransactionReceipt {
                tx_hash,
                block_number,
                status,
            },
        );
    }

    fn head(state: &LedgerState) -> u64 {
        state
            .events
            .iter()
            .map(|e| e.block_number)
            .max()
            .unwrap_or(0)
    }
}

impl LedgerClient for MemoryLedger {
    async fn fetch_events(&self, since: Cursor) -> Result<EventBatch, LedgerError> {
        let mut state = self.lock();
        state.fetch_calls += 1;

        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(LedgerError::Transport("ledger unreachable".to_string()));
        }

        let events = state
            .events
            .iter()
            .filter(|e| e.block_number > since.block())
            .cloned()
            .collect();

        Ok(EventBatch {
            events,
            cursor: Cursor(Self::head(&state).max(since.block())),
        })
    }

    async fn is_authorized_verifier(&self, verifier: Address) -> Result<bool, LedgerError> {
        Ok(self.lock().authorized.contains(&verifier))
    }

    async fn attestation_status(
        &self,
        attestation_id: AttestationId,
    ) -> Result<AttestationStatus, LedgerError> {
        Ok(self.status_of(&attestation_id))
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        Ok(self.lock().nonces.get(&account).copied().unwrap_or(0))
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.lock().chain_id)
    }

    async fn send_transaction(
        &self,
        transaction: &SignedVerdictTransaction,
    ) -> Result<TxHash, LedgerError> {
        let mut state = self.lock();

        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(LedgerError::Transport("connection reset".to_string()));
        }
        if state.rejecting_sends > 0 {
            state.rejecting_sends -= 1;
            return Err(LedgerError::Rejected("insufficient funds for gas".to_string()));
        }
        if transaction.transaction.chain_id != state.chain_id {
            return Err(LedgerError::Rejected(format!(
                "wrong chain id {}",
                transaction.transaction.chain_id
            )));
        }
        if !transaction.verify() {
            return Err(LedgerError::Rejected("invalid signature".to_string()));
        }

        let expected = state.nonces.get(&transaction.signer).copied().unwrap_or(0);
        if transaction.transaction.nonce != expected {
            return Err(LedgerError::Rejected(format!(
                "nonce {} does not match expected {}",
                transaction.transaction.nonce, expected
            )));
        }
        state.nonces.insert(transaction.signer, expected + 1);

        state.sent.push(transaction.clone());
        if state.withhold_receipts {
            state.unmined.push(transaction.clone());
        } else {
            Self::mine(&mut state, transaction);
        }

        Ok(transaction.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        Ok(self.lock().receipts.get(&tx_hash).cloned())
    }
}
