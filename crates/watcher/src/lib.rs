//! Ledger-facing half of the verifier: event watching, content resolution,
//! verdict submission.
//!
//! The [`LedgerClient`] and [`ContentResolver`] traits are the seams; the
//! crate ships a JSON-RPC client, an in-memory ledger for tests, and
//! directory-backed and static resolvers.

pub mod backoff;
pub mod client;
pub mod credential;
pub mod memory;
pub mod resolver;
pub mod rpc;
pub mod submitter;
pub mod watcher;

pub use backoff::Backoff;
pub use client::{
    EventBatch, LedgerClient, LedgerError, ReceiptStatus, SignedVerdictTransaction,
    TransactionReceipt, VerdictTransaction,
};
pub use credential::{CredentialError, VerifierCredential};
pub use memory::MemoryLedger;
pub use resolver::{
    ContentResolver, DirectoryResolver, ReasoningDocument, ResolveError, StaticResolver,
};
pub use rpc::RpcLedgerClient;
pub use submitter::{SubmissionReceipt, SubmitError, SubmitMode, SubmitterConfig, VerdictSubmitter};
pub use watcher::{
    DispatchError, DispatchOutcome, Watcher, WatcherConfig, WatcherState, WatcherStats,
};
