//! Audit Store - Append-Only Verdict and Submission History
//!
//! Every verdict the watcher produces is persisted before submission is
//! attempted, and every submission attempt is appended afterwards. Rows are
//! never updated or deleted.
//!
//! # Tables
//!
//! - `verdicts`: one row per attestation (UNIQUE on `attestation_id`), chained
//!   with BLAKE3 `entry_hash` / `prev_entry_hash` pointers
//! - `submission_attempts`: one row per send attempt, outcome included
//! - `dispatch_failures`: events that could not be turned into a verdict
//! - `watcher_cursor`: single-row watermark of the last processed block
//!
//! # Guarantees
//!
//! - At most one verdict per attestation
//! - Chain continuity is verified on open; a tampered or reordered row fails
//!   the check and the store refuses to open
//! - SQLite WAL mode for crash recovery

use crate::error::{AuditError, Result};
use crate::export;
use attest_core::{
    Address, AttestationEvent, AttestationId, Cursor, SubmissionOutcome, SubmissionStatus, TxHash,
    VerificationVerdict,
};
use blake3::Hasher;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};

const GENESIS_HASH: [u8; 32] = [0u8; 32];

const VERDICT_COLUMNS: &str = "v.seq_no, v.attestation_id, v.recorded_at, v.agent, v.category, \
     v.block_number, v.passed, v.score, v.reason, v.checks_passed, v.checks_total, \
     v.content_hash, v.verifier, v.entry_hash, v.prev_entry_hash";

/// A verdict as persisted, with the event context it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditedVerdict {
    /// Position in the audit chain
    pub seq_no: u64,
    /// Unix milliseconds at which the verdict was recorded
    pub recorded_at: i64,
    /// Agent that submitted the attestation
    pub agent: Address,
    /// Attestation category
    pub category: String,
    /// Block in which the attestation was observed
    pub block_number: u64,
    /// The verdict itself
    pub verdict: VerificationVerdict,
    /// Verifier identity that produced the verdict
    pub verifier: String,
    #[serde(with = "hex_bytes")]
    pub entry_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub prev_entry_hash: Vec<u8>,
}

/// One submission attempt for a recorded verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    /// 1-based attempt counter per attestation
    pub attempt_no: u32,
    /// Unix milliseconds at which the attempt finished
    pub recorded_at: i64,
    #[serde(flatten)]
    pub outcome: SubmissionOutcome,
    pub dry_run: bool,
    pub verifier: String,
}

/// An event that failed before a verdict could be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub attestation_id: AttestationId,
    pub block_number: u64,
    /// Unix milliseconds at which the failure was recorded
    pub recorded_at: i64,
    /// Failing stage, e.g. `resolution`
    pub kind: String,
    pub error: String,
    pub verifier: String,
}

/// Audit store health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditHealth {
    Ok,
    Corrupted {
        last_good_seq_no: Option<u64>,
        first_bad_seq_no: u64,
        error_type: String,
    },
}

impl AuditHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, AuditHealth::Ok)
    }
}

/// Observability counters for the audit store
#[derive(Debug, Default, Clone)]
pub struct AuditMetrics {
    pub verdicts_recorded_total: u64,
    pub attempts_recorded_total: u64,
    pub dispatch_failures_recorded_total: u64,
    pub startup_checks_total: u64,
    pub corruption_detections_total: u64,
    pub export_failures_total: u64,
}

/// Fields covered by a verdict's entry hash, in a fixed order.
#[derive(Serialize)]
struct ChainedEntry<'a> {
    attestation_id: &'a AttestationId,
    recorded_at: i64,
    agent: &'a Address,
    category: &'a str,
    block_number: u64,
    passed: bool,
    score: u8,
    reason: &'a str,
    checks_passed: u32,
    checks_total: u32,
    content_hash: Option<&'a str>,
    verifier: &'a str,
}

impl<'a> ChainedEntry<'a> {
    fn of(record: &'a AuditedVerdict) -> Self {
        Self {
            attestation_id: &record.verdict.attestation_id,
            recorded_at: record.recorded_at,
            agent: &record.agent,
            category: &record.category,
            block_number: record.block_number,
            passed: record.verdict.passed,
            score: record.verdict.score,
            reason: &record.verdict.reason,
            checks_passed: record.verdict.checks_passed,
            checks_total: record.verdict.checks_total,
            content_hash: record.verdict.content_hash.as_deref(),
            verifier: &record.verifier,
        }
    }

    fn hash(&self, prev_entry_hash: &[u8]) -> Result<Vec<u8>> {
        let mut hasher = Hasher::new();
        hasher.update(prev_entry_hash);
        hasher.update(&serde_json::to_vec(self)?);
        Ok(hasher.finalize().as_bytes().to_vec())
    }
}

/// Append-only audit store with SQLite backend
pub struct AuditLog {
    conn: Connection,
    path: PathBuf,
    verifier: String,
    export_dir: Option<PathBuf>,
    health: AuditHealth,
    metrics: AuditMetrics,
}

impl AuditLog {
    /// Create or open an audit store at `path`, recording `verifier` as the
    /// identity on every row written through this handle.
    pub fn open(path: impl AsRef<Path>, verifier: impl Into<String>) -> Result<Self> {
        let verifier = verifier.into();
        let path = path.as_ref();

        info!(
            verifier = %verifier,
            path = %path.display(),
            "Opening audit store"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;

        let mut store = Self {
            conn,
            path: path.to_path_buf(),
            verifier,
            export_dir: None,
            health: AuditHealth::Ok,
            metrics: AuditMetrics::default(),
        };

        store.startup_continuity_check()?;

        Ok(store)
    }

    /// Mirror every audit write as `<dir>/<id-prefix>.json`.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS verdicts (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                attestation_id TEXT NOT NULL UNIQUE,
                recorded_at INTEGER NOT NULL,
                agent TEXT NOT NULL,
                category TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                score INTEGER NOT NULL,
                reason TEXT NOT NULL,
                checks_passed INTEGER NOT NULL,
                checks_total INTEGER NOT NULL,
                content_hash TEXT,
                verifier TEXT NOT NULL,
                entry_hash BLOB NOT NULL,
                prev_entry_hash BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS submission_attempts (
                attempt_id INTEGER PRIMARY KEY AUTOINCREMENT,
                attestation_id TEXT NOT NULL REFERENCES verdicts(attestation_id),
                attempt_no INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                tx_hash TEXT,
                error TEXT,
                retryable INTEGER NOT NULL DEFAULT 0,
                dry_run INTEGER NOT NULL,
                verifier TEXT NOT NULL,
                UNIQUE (attestation_id, attempt_no)
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_attestation
                ON submission_attempts(attestation_id);

            CREATE TABLE IF NOT EXISTS dispatch_failures (
                failure_id INTEGER PRIMARY KEY AUTOINCREMENT,
                attestation_id TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                kind TEXT NOT NULL,
                error TEXT NOT NULL,
                verifier TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dispatch_failures_attestation
                ON dispatch_failures(attestation_id);

            CREATE TABLE IF NOT EXISTS watcher_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                block_number INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Persist a verdict for `event`.
    ///
    /// # Returns
    /// * `Ok(u64)` - The assigned sequence number
    /// * `Err(AuditError::DuplicateVerdict)` - A verdict already exists for this attestation
    pub fn record_verdict(
        &mut self,
        event: &AttestationEvent,
        verdict: &VerificationVerdict,
    ) -> Result<u64> {
        if !self.health.is_ok() {
            return Err(AuditError::CorruptionDetected(
                "Cannot append to corrupted audit store".to_string(),
            ));
        }
        if event.id != verdict.attestation_id {
            return Err(AuditError::MismatchedEvent {
                verdict: verdict.attestation_id,
                event: event.id,
            });
        }

        let tx = self.conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM verdicts WHERE attestation_id = ?1",
                [verdict.attestation_id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(AuditError::DuplicateVerdict {
                attestation_id: verdict.attestation_id,
            });
        }

        let prev_entry_hash = tx
            .query_row(
                "SELECT entry_hash FROM verdicts ORDER BY seq_no DESC LIMIT 1",
                [],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .unwrap_or_else(|| GENESIS_HASH.to_vec());

        let mut record = AuditedVerdict {
            seq_no: 0,
            recorded_at: Utc::now().timestamp_millis(),
            agent: event.agent,
            category: event.category.clone(),
            block_number: event.block_number,
            verdict: verdict.clone(),
            verifier: self.verifier.clone(),
            entry_hash: Vec::new(),
            prev_entry_hash,
        };
        record.entry_hash = ChainedEntry::of(&record).hash(&record.prev_entry_hash)?;

        tx.execute(
            r#"
            INSERT INTO verdicts (
                attestation_id, recorded_at, agent, category, block_number,
                passed, score, reason, checks_passed, checks_total,
                content_hash, verifier, entry_hash, prev_entry_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                record.verdict.attestation_id.to_string(),
                record.recorded_at,
                record.agent.to_string(),
                record.category,
                record.block_number as i64,
                record.verdict.passed,
                record.verdict.score as i64,
                record.verdict.reason,
                record.verdict.checks_passed as i64,
                record.verdict.checks_total as i64,
                record.verdict.content_hash,
                record.verifier,
                record.entry_hash,
                record.prev_entry_hash,
            ],
        )?;

        record.seq_no = tx.last_insert_rowid() as u64;
        tx.commit()?;

        self.metrics.verdicts_recorded_total += 1;

        info!(
            target: "attest_audit::verdict",
            seq_no = record.seq_no,
            attestation_id = %record.verdict.attestation_id,
            agent = %record.agent,
            category = %record.category,
            block_number = record.block_number,
            passed = record.verdict.passed,
            score = record.verdict.score,
            checks_passed = record.verdict.checks_passed,
            checks_total = record.verdict.checks_total,
            reason = %record.verdict.reason,
            content_hash = record.verdict.content_hash.as_deref().unwrap_or(""),
            verifier = %record.verifier,
            "Verdict recorded"
        );

        self.mirror(&record, &[]);

        Ok(record.seq_no)
    }

    /// Append a submission attempt for an already recorded verdict.
    ///
    /// # Returns
    /// * `Ok(u32)` - The attempt number (1 for the first attempt)
    pub fn record_attempt(
        &mut self,
        attestation_id: &AttestationId,
        outcome: &SubmissionOutcome,
        dry_run: bool,
    ) -> Result<u32> {
        let tx = self.conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM verdicts WHERE attestation_id = ?1",
                [attestation_id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(AuditError::VerdictNotFound {
                attestation_id: *attestation_id,
            });
        }

        let previous: i64 = tx.query_row(
            "SELECT COUNT(*) FROM submission_attempts WHERE attestation_id = ?1",
            [attestation_id.to_string()],
            |row| row.get(0),
        )?;
        let attempt_no = previous as u32 + 1;

        let error = match outcome {
            SubmissionOutcome::Failed { error, .. } | SubmissionOutcome::Unconfirmed { error, .. } => {
                Some(error.as_str())
            }
            _ => None,
        };
        let retryable = outcome.is_retryable();
        let recorded_at = Utc::now().timestamp_millis();

        tx.execute(
            r#"
            INSERT INTO submission_attempts (
                attestation_id, attempt_no, recorded_at, outcome,
                tx_hash, error, retryable, dry_run, verifier
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                attestation_id.to_string(),
                attempt_no as i64,
                recorded_at,
                outcome.label(),
                outcome.tx_hash().map(|h| h.to_string()),
                error,
                retryable,
                dry_run,
                self.verifier,
            ],
        )?;

        tx.commit()?;

        self.metrics.attempts_recorded_total += 1;

        info!(
            target: "attest_audit::submission",
            attestation_id = %attestation_id,
            attempt_no = attempt_no,
            outcome = outcome.label(),
            tx_hash = %outcome.tx_hash().map(|h| h.to_string()).unwrap_or_default(),
            error = error.unwrap_or(""),
            retryable = retryable,
            dry_run = dry_run,
            verifier = %self.verifier,
            "Submission attempt recorded"
        );

        if self.export_dir.is_some() {
            match (self.verdict(attestation_id), self.attempts(attestation_id)) {
                (Ok(Some(record)), Ok(attempts)) => self.mirror(&record, &attempts),
                (Err(e), _) | (_, Err(e)) => {
                    self.metrics.export_failures_total += 1;
                    warn!(attestation_id = %attestation_id, error = %e, "Failed to reload record for export");
                }
                (Ok(None), _) => {}
            }
        }

        Ok(attempt_no)
    }

    fn mirror(&mut self, record: &AuditedVerdict, attempts: &[SubmissionAttempt]) {
        let Some(dir) = self.export_dir.as_deref() else {
            return;
        };
        let status = attempts
            .last()
            .map(|a| a.outcome.status())
            .unwrap_or(SubmissionStatus::Pending);

        match export::write_export(dir, record, attempts, status) {
            Ok(path) => debug!(path = %path.display(), "Audit record exported"),
            Err(e) => {
                self.metrics.export_failures_total += 1;
                warn!(
                    attestation_id = %record.verdict.attestation_id,
                    error = %e,
                    "Failed to export audit record"
                );
            }
        }
    }

    /// The recorded verdict for an attestation, if any.
    pub fn verdict(&self, attestation_id: &AttestationId) -> Result<Option<AuditedVerdict>> {
        let sql = format!("SELECT {VERDICT_COLUMNS} FROM verdicts v WHERE v.attestation_id = ?1");
        let record = self
            .conn
            .query_row(&sql, [attestation_id.to_string()], verdict_from_row)
            .optional()?;
        Ok(record)
    }

    /// All submission attempts for an attestation, oldest first.
    pub fn attempts(&self, attestation_id: &AttestationId) -> Result<Vec<SubmissionAttempt>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT attempt_no, recorded_at, outcome, tx_hash, error, retryable, dry_run, verifier
            FROM submission_attempts
            WHERE attestation_id = ?1
            ORDER BY attempt_no ASC
            "#,
        )?;

        let attempts = stmt
            .query_map([attestation_id.to_string()], attempt_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(attempts)
    }

    /// Submission status derived from the latest attempt; `None` when no
    /// verdict has been recorded.
    pub fn status(&self, attestation_id: &AttestationId) -> Result<Option<SubmissionStatus>> {
        if self.verdict(attestation_id)?.is_none() {
            return Ok(None);
        }
        let status = self
            .attempts(attestation_id)?
            .last()
            .map(|a| a.outcome.status())
            .unwrap_or(SubmissionStatus::Pending);
        Ok(Some(status))
    }

    /// Verdicts eligible for resubmission: never attempted, or whose latest
    /// attempt failed retryably or went unconfirmed, with fewer than
    /// `max_attempts` attempts.
    pub fn retryable_failures(&self, max_attempts: u32) -> Result<Vec<VerificationVerdict>> {
        let sql = format!(
            r#"
            SELECT {VERDICT_COLUMNS}
            FROM verdicts v
            LEFT JOIN (
                SELECT attestation_id, MAX(attempt_id) AS last_id, COUNT(*) AS n
                FROM submission_attempts
                GROUP BY attestation_id
            ) a ON a.attestation_id = v.attestation_id
            LEFT JOIN submission_attempts s ON s.attempt_id = a.last_id
            WHERE a.last_id IS NULL
               OR (s.outcome IN ('failed', 'unconfirmed') AND s.retryable = 1 AND a.n < ?1)
            ORDER BY v.seq_no ASC
            "#
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let verdicts = stmt
            .query_map([max_attempts as i64], verdict_from_row)?
            .map(|r| r.map(|record| record.verdict))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(verdicts)
    }

    /// Record that `event` failed to process at stage `kind`.
    pub fn record_dispatch_failure(
        &mut self,
        event: &AttestationEvent,
        kind: &str,
        error: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO dispatch_failures (
                attestation_id, block_number, recorded_at, kind, error, verifier
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.id.to_string(),
                event.block_number as i64,
                Utc::now().timestamp_millis(),
                kind,
                error,
                self.verifier,
            ],
        )?;

        self.metrics.dispatch_failures_recorded_total += 1;

        warn!(
            target: "attest_audit::failure",
            attestation_id = %event.id,
            block_number = event.block_number,
            failure = kind,
            error = error,
            verifier = %self.verifier,
            "Event failed to process"
        );

        Ok(())
    }

    /// Recorded dispatch failures for one attestation, oldest first.
    pub fn dispatch_failures(&self, attestation_id: &AttestationId) -> Result<Vec<DispatchFailure>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT attestation_id, block_number, recorded_at, kind, error, verifier
            FROM dispatch_failures
            WHERE attestation_id = ?1
            ORDER BY failure_id ASC
            "#,
        )?;
        let failures = stmt
            .query_map([attestation_id.to_string()], |row| {
                Ok(DispatchFailure {
                    attestation_id: parse_column(0, row.get(0)?)?,
                    block_number: row.get::<_, i64>(1)? as u64,
                    recorded_at: row.get(2)?,
                    kind: row.get(3)?,
                    error: row.get(4)?,
                    verifier: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(failures)
    }

    /// Number of recorded verdicts.
    pub fn verdict_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM verdicts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Last persisted watcher cursor.
    pub fn load_cursor(&self) -> Result<Option<Cursor>> {
        let block = self
            .conn
            .query_row(
                "SELECT block_number FROM watcher_cursor WHERE id = 0",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(block.map(|b| Cursor(b as u64)))
    }

    /// Persist the watcher cursor.
    pub fn store_cursor(&mut self, cursor: Cursor) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO watcher_cursor (id, block_number, updated_at) VALUES (0, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                block_number = excluded.block_number,
                updated_at = excluded.updated_at
            "#,
            params![cursor.block() as i64, Utc::now().timestamp_millis()],
        )?;
        debug!(cursor = %cursor, "Watcher cursor stored");
        Ok(())
    }

    /// Verify sequence and hash-chain continuity of the verdict table.
    ///
    /// Each row's entry hash is recomputed from its stored fields, so an
    /// edited row is detected as well as a broken pointer.
    pub fn startup_continuity_check(&mut self) -> Result<()> {
        self.metrics.startup_checks_total += 1;

        info!(verifier = %self.verifier, "Starting audit continuity check");

        let sql = format!("SELECT {VERDICT_COLUMNS} FROM verdicts v ORDER BY v.seq_no ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], verdict_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let Some(first) = records.first() else {
            info!(verifier = %self.verifier, "Audit store is empty, continuity check passed");
            return Ok(());
        };

        let mut expected_seq_no = first.seq_no;
        let mut prev_entry_hash = GENESIS_HASH.to_vec();

        for (i, record) in records.iter().enumerate() {
            let fault = if record.seq_no != expected_seq_no {
                Some(format!(
                    "Sequence gap: expected {}, found {}",
                    expected_seq_no, record.seq_no
                ))
            } else if record.prev_entry_hash != prev_entry_hash {
                Some(format!(
                    "Chain break at seq_no {}: expected prev_hash {}, got {}",
                    record.seq_no,
                    hex::encode(&prev_entry_hash),
                    hex::encode(&record.prev_entry_hash)
                ))
            } else if ChainedEntry::of(record).hash(&record.prev_entry_hash)? != record.entry_hash {
                Some(format!("Entry hash mismatch at seq_no {}", record.seq_no))
            } else {
                None
            };

            if let Some(error_type) = fault {
                self.health = AuditHealth::Corrupted {
                    last_good_seq_no: i.checked_sub(1).map(|j| records[j].seq_no),
                    first_bad_seq_no: record.seq_no,
                    error_type: error_type.clone(),
                };
                self.metrics.corruption_detections_total += 1;

                error!(
                    verifier = %self.verifier,
                    seq_no = record.seq_no,
                    error_type = %error_type,
                    "Audit store corruption detected"
                );

                return Err(AuditError::CorruptionDetected(error_type));
            }

            prev_entry_hash = record.entry_hash.clone();
            expected_seq_no += 1;
        }

        info!(
            verifier = %self.verifier,
            verdict_count = records.len(),
            "Audit continuity check passed"
        );

        Ok(())
    }

    pub fn health(&self) -> &AuditHealth {
        &self.health
    }

    pub fn metrics(&self) -> &AuditMetrics {
        &self.metrics
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }
}

fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = attest_core::CoreError>,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn verdict_from_row(row: &Row<'_>) -> rusqlite::Result<AuditedVerdict> {
    Ok(AuditedVerdict {
        seq_no: row.get::<_, i64>(0)? as u64,
        recorded_at: row.get(2)?,
        agent: parse_column(3, row.get(3)?)?,
        category: row.get(4)?,
        block_number: row.get::<_, i64>(5)? as u64,
        verdict: VerificationVerdict {
            attestation_id: parse_column(1, row.get(1)?)?,
            passed: row.get(6)?,
            score: row.get::<_, i64>(7)? as u8,
            reason: row.get(8)?,
            checks_passed: row.get::<_, i64>(9)? as u32,
            checks_total: row.get::<_, i64>(10)? as u32,
            content_hash: row.get(11)?,
        },
        verifier: row.get(12)?,
        entry_hash: row.get(13)?,
        prev_entry_hash: row.get(14)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<SubmissionAttempt> {
    let label: String = row.get(2)?;
    let tx_hash: Option<String> = row.get(3)?;
    let tx_hash = tx_hash
        .map(|raw| parse_column::<TxHash>(3, raw))
        .transpose()?;

    let outcome = match (label.as_str(), tx_hash) {
        ("confirmed", Some(tx_hash)) => SubmissionOutcome::Confirmed { tx_hash },
        ("reverted", Some(tx_hash)) => SubmissionOutcome::Reverted { tx_hash },
        ("dry_run", Some(tx_hash)) => SubmissionOutcome::DryRun { tx_hash },
        ("unconfirmed", Some(tx_hash)) => SubmissionOutcome::Unconfirmed {
            tx_hash,
            error: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        },
        ("failed", _) => SubmissionOutcome::Failed {
            error: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            retryable: row.get(5)?,
        },
        (other, _) => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unrecognised outcome '{other}'").into(),
            ))
        }
    };

    Ok(SubmissionAttempt {
        attempt_no: row.get::<_, i64>(0)? as u32,
        recorded_at: row.get(1)?,
        outcome,
        dry_run: row.get(6)?,
        verifier: row.get(7)?,
    })
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
