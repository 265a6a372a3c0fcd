//! The ledger seam: everything the watcher and submitter need from the
//! chain, behind one trait.

use crate::credential::VerifierCredential;
use attest_core::{Address, AttestationEvent, AttestationId, AttestationStatus, Cursor, TxHash};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Domain tag prefixed to every signed verdict transaction.
pub const VERDICT_TX_DOMAIN: &[u8] = b"attest-verdict-tx-v1";

/// Errors returned by a ledger client.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed ledger response: {0}")]
    Decode(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) => true,
            LedgerError::Http { status, .. } => *status >= 500 || *status == 429,
            LedgerError::Rpc { .. } | LedgerError::Decode(_) | LedgerError::Rejected(_) => false,
        }
    }
}

/// Events observed after a cursor, plus the cursor to resume from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<AttestationEvent>,
    /// Highest block scanned to produce this batch
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// Inclusion receipt for a sent transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Unsigned verdict write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictTransaction {
    /// Attestation contract
    pub to: Address,
    pub attestation_id: AttestationId,
    pub passed: bool,
    pub score: u8,
    pub nonce: u64,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl VerdictTransaction {
    /// Fixed-layout bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(VERDICT_TX_DOMAIN.len() + 94);
        bytes.extend_from_slice(VERDICT_TX_DOMAIN);
        bytes.extend_from_slice(&self.chain_id.to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(self.to.as_bytes());
        bytes.extend_from_slice(self.attestation_id.as_bytes());
        bytes.push(self.passed as u8);
        bytes.push(self.score);
        bytes.extend_from_slice(&self.gas_limit.to_be_bytes());
        bytes
    }

    /// Sign with the verifier credential.
    pub fn sign(self, credential: &VerifierCredential) -> SignedVerdictTransaction {
        let signature = credential.sign(&self.signing_bytes());
        SignedVerdictTransaction {
            signer: credential.address(),
            public_key: hex::encode(credential.public_key()),
            signature: hex::encode(signature),
            transaction: self,
        }
    }
}

/// Verdict transaction with its Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVerdictTransaction {
    pub transaction: VerdictTransaction,
    pub signer: Address,
    /// Hex Ed25519 verifying key
    pub public_key: String,
    /// Hex Ed25519 signature
    pub signature: String,
}

impl SignedVerdictTransaction {
    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> bool {
        let Ok(key_bytes) = hex::decode(&self.public_key) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_array) else {
            return false;
        };
        key.verify(
            &self.transaction.signing_bytes(),
            &Signature::from_bytes(&sig_array),
        )
        .is_ok()
    }

    /// BLAKE3 over the signed bytes and signature.
    pub fn tx_hash(&self) -> TxHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.transaction.signing_bytes());
        hasher.update(self.signature.as_bytes());
        TxHash(*hasher.finalize().as_bytes())
    }
}

/// Read and write access to the attestation ledger.
pub trait LedgerClient {
    /// Attestation events in blocks after `since`, in ledger order.
    fn fetch_events(
        &self,
        since: Cursor,
    ) -> impl Future<Output = Result<EventBatch, LedgerError>> + Send;

    fn is_authorized_verifier(
        &self,
        verifier: Address,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn attestation_status(
        &self,
        attestation_id: AttestationId,
    ) -> impl Future<Output = Result<AttestationStatus, LedgerError>> + Send;

    /// Next nonce for `account`.
    fn transaction_count(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    fn send_transaction(
        &self,
        transaction: &SignedVerdictTransaction,
    ) -> impl Future<Output = Result<TxHash, LedgerError>> + Send;

    /// `None` while the transaction is not yet included.
    fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>, LedgerError>> + Send;
}
