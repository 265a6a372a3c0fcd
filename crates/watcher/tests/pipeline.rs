//! End-to-end watcher tests against the in-memory ledger.

use attest_audit::AuditLog;
use attest_core::{
    Address, AttestationEvent, AttestationId, AttestationStatus, Cursor, RetryConfig,
    SubmissionOutcome, SubmissionStatus, TxHash,
};
use attest_watcher::{
    DispatchError, DispatchOutcome, MemoryLedger, StaticResolver, SubmitMode, SubmitterConfig,
    VerdictSubmitter, VerifierCredential, Watcher, WatcherConfig, WatcherState,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CHAIN_ID: u64 = 31337;

fn temp_db() -> PathBuf {
    std::env::temp_dir().join(format!("pipeline_{}.db", uuid::Uuid::new_v4()))
}

fn event(seed: u8, block: u64) -> AttestationEvent {
    AttestationEvent {
        id: AttestationId([seed; 32]),
        agent: Address([0x33; 20]),
        category: "reasoning".to_string(),
        observed_at: 1_700_000_000,
        block_number: block,
    }
}

fn good_reasoning() -> serde_json::Value {
    json!({
        "input": "Should the shipment be rerouted through the northern depot?",
        "reasoning_steps": [
            {"index": 1, "description": "Compared depot capacity", "rationale": "Northern depot has spare room"},
            {"index": 2, "description": "Checked road closures", "rationale": "No closures reported"}
        ],
        "conclusion": "Reroute through the northern depot",
        "confidence": 0.82
    })
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(20),
        start_block: 0,
        max_submission_attempts: 3,
        retry: RetryConfig {
            initial_delay_ms: 5,
            max_delay_ms: 20,
        },
    }
}

fn build(
    ledger: &MemoryLedger,
    resolver: StaticResolver,
    db_path: &PathBuf,
    mode: SubmitMode,
) -> Watcher<MemoryLedger, StaticResolver> {
    let client = Arc::new(ledger.clone());
    let mut submit_config = SubmitterConfig::new(Address([0xcc; 20]));
    submit_config.confirmation_timeout = Duration::from_millis(100);
    submit_config.receipt_poll_interval = Duration::from_millis(10);

    let submitter = VerdictSubmitter::new(
        client.clone(),
        VerifierCredential::from_bytes(&[0x44; 32]).unwrap(),
        submit_config,
        mode,
    );
    let audit = AuditLog::open(db_path, "0xverifier").unwrap();
    Watcher::new(client, resolver, audit, submitter, watcher_config()).unwrap()
}

fn resolver_for(ids: &[u8]) -> StaticResolver {
    let mut resolver = StaticResolver::new();
    for seed in ids {
        resolver.insert_json(AttestationId([*seed; 32]), &good_reasoning());
    }
    resolver
}

#[tokio::test]
async fn redelivered_event_is_handled_once() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::DryRun);

    ledger.push_event(event(1, 5));
    assert_eq!(watcher.poll_once().await.unwrap(), 1);

    ledger.push_event(event(1, 6));
    assert_eq!(watcher.poll_once().await.unwrap(), 0);

    let stats = watcher.stats();
    assert_eq!(stats.events_seen, 2);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(stats.dispatched, 1);

    let id = AttestationId([1; 32]);
    assert_eq!(watcher.audit().verdict_count().unwrap(), 1);
    assert_eq!(watcher.audit().attempts(&id).unwrap().len(), 1);
    assert_eq!(watcher.cursor(), Cursor(6));
    assert_eq!(watcher.state(), WatcherState::Idle);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn live_verdicts_land_on_ledger() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);

    let mut resolver = resolver_for(&[1]);
    resolver.insert(AttestationId([2; 32]), "definitely not json");
    let mut watcher = build(&ledger, resolver, &db_path, SubmitMode::Live);

    ledger.push_event(event(1, 3));
    ledger.push_event(event(2, 4));
    watcher.poll_once().await.unwrap();

    assert_eq!(ledger.status_of(&AttestationId([1; 32])), AttestationStatus::Verified);
    assert_eq!(ledger.status_of(&AttestationId([2; 32])), AttestationStatus::Rejected);

    let rejected = watcher.audit().verdict(&AttestationId([2; 32])).unwrap().unwrap();
    assert_eq!(rejected.verdict.score, 0);
    assert!(!rejected.verdict.passed);
    assert_eq!(rejected.verdict.content_hash, None);

    let sent = ledger.sent_transactions();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].transaction.score, 100);
    assert_eq!(sent[1].transaction.nonce, 1);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn settled_attestations_are_skipped() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);

    ledger.push_event(event(1, 2));
    ledger.set_status(AttestationId([1; 32]), AttestationStatus::Verified);

    let outcome = watcher.dispatch(&event(1, 2)).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::AlreadyFinal(AttestationStatus::Verified));
    assert_eq!(watcher.audit().verdict_count().unwrap(), 0);
    assert!(ledger.sent_transactions().is_empty());

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn missing_content_is_a_resolution_failure() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, StaticResolver::new(), &db_path, SubmitMode::DryRun);

    let err = watcher.dispatch(&event(9, 1)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Resolution(_)));
    assert_eq!(err.kind(), "resolution");

    ledger.push_event(event(9, 1));
    watcher.poll_once().await.unwrap();
    assert_eq!(watcher.stats().dispatch_failures, 1);
    assert!(watcher.is_processed(&AttestationId([9; 32])));
    assert_eq!(watcher.audit().verdict_count().unwrap(), 0);

    let failures = watcher
        .audit()
        .dispatch_failures(&AttestationId([9; 32]))
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, "resolution");
    assert_eq!(failures[0].block_number, 1);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn failed_submission_is_resubmitted_next_cycle() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.push_event(event(1, 1));
    ledger.fail_next_sends(1);
    watcher.poll_once().await.unwrap();

    assert_eq!(watcher.stats().dispatch_failures, 1);
    assert_eq!(
        watcher.audit().status(&id).unwrap(),
        Some(SubmissionStatus::SubmissionFailed)
    );

    // The sweep skips ids handled in the same cycle, so the retry happens on
    // the following poll.
    watcher.poll_once().await.unwrap();

    assert_eq!(watcher.stats().resubmitted, 1);
    assert_eq!(watcher.audit().status(&id).unwrap(), Some(SubmissionStatus::Submitted));
    assert_eq!(ledger.sent_transactions().len(), 1);
    assert_eq!(ledger.status_of(&id), AttestationStatus::Verified);

    let original = watcher.audit().verdict(&id).unwrap().unwrap();
    assert_eq!(ledger.sent_transactions()[0].transaction.score, original.verdict.score);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn late_confirmation_is_recorded_without_resending() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.withhold_receipts(true);
    ledger.push_event(event(1, 1));
    watcher.poll_once().await.unwrap();

    let sent_hash = ledger.sent_transactions()[0].tx_hash();
    let attempts = watcher.audit().attempts(&id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome.tx_hash(), Some(sent_hash));
    assert!(matches!(attempts[0].outcome, SubmissionOutcome::Unconfirmed { .. }));

    // The transaction is mined after the confirmation window closed.
    ledger.withhold_receipts(false);
    watcher.poll_once().await.unwrap();

    assert_eq!(ledger.sent_transactions().len(), 1);
    assert_eq!(ledger.status_of(&id), AttestationStatus::Verified);
    assert_eq!(watcher.stats().reconciled, 1);
    assert_eq!(watcher.stats().resubmitted, 0);

    let attempts = watcher.audit().attempts(&id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[1].outcome,
        SubmissionOutcome::Confirmed { tx_hash: sent_hash }
    );
    assert_eq!(watcher.audit().status(&id).unwrap(), Some(SubmissionStatus::Submitted));

    // Settled verdicts leave the sweep.
    watcher.poll_once().await.unwrap();
    assert_eq!(ledger.sent_transactions().len(), 1);
    assert_eq!(watcher.audit().attempts(&id).unwrap().len(), 2);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn verdict_final_elsewhere_is_not_resent() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.push_event(event(1, 1));
    ledger.fail_next_sends(1);
    watcher.poll_once().await.unwrap();

    ledger.set_status(id, AttestationStatus::Verified);
    watcher.poll_once().await.unwrap();
    watcher.poll_once().await.unwrap();

    assert!(ledger.sent_transactions().is_empty());
    let attempts = watcher.audit().attempts(&id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[1].outcome.is_retryable());

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn rejected_transaction_is_not_resubmitted() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.push_event(event(1, 1));
    ledger.reject_next_sends(1);
    watcher.poll_once().await.unwrap();
    watcher.poll_once().await.unwrap();

    let attempts = watcher.audit().attempts(&id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(matches!(
        attempts[0].outcome,
        SubmissionOutcome::Failed { retryable: false, .. }
    ));
    assert_eq!(watcher.stats().resubmitted, 0);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn resubmission_stops_at_attempt_limit() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.push_event(event(1, 1));
    ledger.fail_next_sends(100);
    for _ in 0..6 {
        watcher.poll_once().await.unwrap();
    }

    // max_submission_attempts = 3
    assert_eq!(watcher.audit().attempts(&id).unwrap().len(), 3);
    assert!(watcher.audit().retryable_failures(3).unwrap().is_empty());

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn reverted_verdict_is_not_resubmitted() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::Live);
    let id = AttestationId([1; 32]);

    ledger.revert_verdicts_for(id);
    ledger.push_event(event(1, 1));
    watcher.poll_once().await.unwrap();
    watcher.poll_once().await.unwrap();

    let attempts = watcher.audit().attempts(&id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(matches!(attempts[0].outcome, SubmissionOutcome::Reverted { .. }));
    assert_eq!(watcher.stats().resubmitted, 0);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn cursor_survives_restart() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);

    {
        let mut watcher = build(&ledger, resolver_for(&[1, 2]), &db_path, SubmitMode::DryRun);
        ledger.push_event(event(1, 10));
        watcher.poll_once().await.unwrap();
        assert_eq!(watcher.cursor(), Cursor(10));
    }

    ledger.push_event(event(2, 11));
    let mut watcher = build(&ledger, resolver_for(&[1, 2]), &db_path, SubmitMode::DryRun);
    assert_eq!(watcher.cursor(), Cursor(10));

    assert_eq!(watcher.poll_once().await.unwrap(), 1);
    assert!(!watcher.is_processed(&AttestationId([1; 32])));
    assert_eq!(watcher.audit().verdict_count().unwrap(), 2);
    assert_eq!(
        watcher.audit().status(&AttestationId([2; 32])).unwrap(),
        Some(SubmissionStatus::DryRun)
    );

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn run_backs_off_and_stops_on_shutdown() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[1]), &db_path, SubmitMode::DryRun);

    ledger.fail_next_fetches(3);
    ledger.push_event(event(1, 1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).unwrap();
    };

    let (stats, _) = tokio::join!(watcher.run(shutdown_rx), stopper);

    assert_eq!(stats.poll_failures, 3);
    assert!(stats.polls > 3);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(watcher.state(), WatcherState::Stopped);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn startup_check_is_advisory() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let watcher = build(&ledger, resolver_for(&[]), &db_path, SubmitMode::DryRun);

    assert_eq!(watcher.startup_check().await, Some(false));

    let credential = VerifierCredential::from_bytes(&[0x44; 32]).unwrap();
    ledger.authorize(credential.address());
    assert_eq!(watcher.startup_check().await, Some(true));

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn dry_run_records_zero_hash() {
    let db_path = temp_db();
    let ledger = MemoryLedger::new(CHAIN_ID);
    let mut watcher = build(&ledger, resolver_for(&[7]), &db_path, SubmitMode::DryRun);

    let outcome = watcher.dispatch(&event(7, 1)).await.unwrap();
    match outcome {
        DispatchOutcome::Submitted(receipt) => {
            assert!(receipt.dry_run);
            assert_eq!(receipt.tx_hash, TxHash::zero());
            assert!(receipt.passed);
            assert_eq!(receipt.score, 100);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(ledger.sent_transactions().is_empty());

    std::fs::remove_file(db_path).ok();
}
