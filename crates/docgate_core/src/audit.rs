//! Audit Logging - Decision Records
//!
//! Every evaluated call produces exactly one `AuditRecord`. Records are
//! chained: each carries the SHA-256 of its predecessor, so editing or
//! dropping a line breaks verification.
//!
//! # Log Format
//!
//! One JSON object per line (NDJSON):
//! ```json
//! {"seq":1,"record_id":"...","ts":"2026-01-21T10:30:00Z","caller_id":"client-1","tool":"read_document","decision":"allow","stage":"decided","detail":"","prev_hash":"000...","hash":"9f2..."}
//! {"seq":2,"record_id":"...","ts":"2026-01-21T10:30:01Z","caller_id":"client-1","tool":"read_document","decision":"deny","reason":"InvalidInput","code":"injection_pattern","stage":"received","detail":"...","prev_hash":"9f2...","hash":"41c..."}
//! ```
//!
//! # Failure Semantics
//!
//! `AuditLog::record` never fails the call. If the sink rejects a record, the
//! record is written to the `docgate_core::audit::fallback` tracing target and
//! the chain head does not advance.
//!
//! A partial last line left by a crash does not stop the gate from starting:
//! `FileAuditSink` reports it on the fallback target, resumes from the last
//! complete record, and starts the next record on a fresh line.

use crate::clock::Clock;
use crate::gate::{Decision, DenialReason, Stage};
use crate::validators::ReasonCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

/// Hash linked by the first record in a chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const FALLBACK_TARGET: &str = "docgate_core::audit::fallback";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write audit record: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed audit record on line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Decision content supplied by the gate
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub caller_id: String,
    pub tool: String,
    pub decision: Decision,
    pub reason: Option<DenialReason>,
    pub code: Option<ReasonCode>,
    pub stage: Stage,
    pub detail: String,
}

/// Immutable, chained audit record as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub record_id: Uuid,
    pub ts: DateTime<Utc>,
    pub caller_id: String,
    pub tool: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ReasonCode>,
    pub stage: Stage,
    pub detail: String,
    pub prev_hash: String,
    pub hash: String,
}

/// Fields covered by the record hash (everything except `hash`)
#[derive(Serialize)]
struct HashedFields<'a> {
    seq: u64,
    record_id: &'a Uuid,
    ts: &'a DateTime<Utc>,
    caller_id: &'a str,
    tool: &'a str,
    decision: Decision,
    reason: Option<DenialReason>,
    code: Option<ReasonCode>,
    stage: Stage,
    detail: &'a str,
    prev_hash: &'a str,
}

impl AuditRecord {
    /// Recompute the hash this record should carry
    pub fn compute_hash(&self) -> String {
        let fields = HashedFields {
            seq: self.seq,
            record_id: &self.record_id,
            ts: &self.ts,
            caller_id: &self.caller_id,
            tool: &self.tool,
            decision: self.decision,
            reason: self.reason,
            code: self.code,
            stage: self.stage,
            detail: &self.detail,
            prev_hash: &self.prev_hash,
        };
        // Serializing a struct of plain fields cannot fail
        let body = serde_json::to_vec(&fields).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(&body);
        hex::encode(hasher.finalize())
    }
}

/// Position of the last persisted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub seq: u64,
    pub hash: String,
}

impl Default for ChainHead {
    fn default() -> Self {
        Self {
            seq: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Append-only destination for audit records
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Last record already persisted, used to resume the chain
    fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        Ok(None)
    }
}

/// NDJSON file sink, opened in append mode
///
/// Each record is one unbuffered `write_all`, so a rejected record never
/// reaches disk later. After a failed write the next record starts on a
/// fresh line in case the failure left a partial one behind.
pub struct FileAuditSink {
    path: PathBuf,
    out: Mutex<SinkWriter>,
}

struct SinkWriter {
    file: Box<dyn Write + Send>,
    torn: bool,
}

impl FileAuditSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let open_err = |e| AuditError::Open {
            path: path.display().to_string(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let torn = ends_mid_line(&path).map_err(open_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self::with_writer(path, Box::new(file), torn))
    }

    fn with_writer(path: PathBuf, file: Box<dyn Write + Send>, torn: bool) -> Self {
        Self {
            path,
            out: Mutex::new(SinkWriter { file, torn }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| AuditError::Unavailable("audit writer lock poisoned".to_string()))?;

        let mut line = Vec::new();
        if out.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        match out.file.write_all(&line).and_then(|()| out.file.flush()) {
            Ok(()) => {
                out.torn = false;
                Ok(())
            }
            Err(e) => {
                out.torn = true;
                Err(e.into())
            }
        }
    }

    /// Last parseable record; unreadable lines are reported and skipped
    fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuditError::Open {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        let mut head = None;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<AuditRecord>(&buf) {
                Ok(record) => {
                    head = Some(ChainHead {
                        seq: record.seq,
                        hash: record.hash,
                    })
                }
                Err(e) => {
                    let text = String::from_utf8_lossy(&buf);
                    error!(
                        target: FALLBACK_TARGET,
                        line = %text.trim_end(),
                        "Skipping unreadable audit line {} in {}: {}",
                        line_no,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        Ok(head)
    }
}

/// True when a non-empty file does not end with a newline
fn ends_mid_line(path: &Path) -> std::io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// In-memory sink, used when no audit file is configured and in tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AuditError::Unavailable("memory sink lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }

    fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        Ok(self.records().last().map(|r| ChainHead {
            seq: r.seq,
            hash: r.hash.clone(),
        }))
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).append(record)
    }

    fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        (**self).head()
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Box<T> {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).append(record)
    }

    fn head(&self) -> Result<Option<ChainHead>, AuditError> {
        (**self).head()
    }
}

// =============================================================================
// AuditLog
// =============================================================================

/// Chains entries into records and appends them to a sink
pub struct AuditLog {
    sink: Box<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    head: Mutex<ChainHead>,
    failed_appends: AtomicU64,
}

impl AuditLog {
    /// Create a log over `sink`, resuming from the sink's last record
    pub fn new(sink: impl AuditSink + 'static, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let head = sink.head()?.unwrap_or_default();
        debug!("Audit chain resumes at seq {}", head.seq);
        Ok(Self {
            sink: Box::new(sink),
            clock,
            head: Mutex::new(head),
            failed_appends: AtomicU64::new(0),
        })
    }

    /// Append one decision; never fails the caller
    pub fn record(&self, entry: AuditEntry) -> Option<AuditRecord> {
        // The head lock serializes appends so seq and prev_hash stay linear
        let mut head = self.head.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = AuditRecord {
            seq: head.seq + 1,
            record_id: Uuid::new_v4(),
            ts: self.clock.now(),
            caller_id: entry.caller_id,
            tool: entry.tool,
            decision: entry.decision,
            reason: entry.reason,
            code: entry.code,
            stage: entry.stage,
            detail: entry.detail,
            prev_hash: head.hash.clone(),
            hash: String::new(),
        };
        record.hash = record.compute_hash();

        match self.sink.append(&record) {
            Ok(()) => {
                head.seq = record.seq;
                head.hash = record.hash.clone();
                Some(record)
            }
            Err(e) => {
                self.failed_appends.fetch_add(1, Ordering::Relaxed);
                let json = serde_json::to_string(&record).unwrap_or_default();
                error!(target: FALLBACK_TARGET, record = %json, "Audit sink rejected record: {}", e);
                None
            }
        }
    }

    /// Number of records the sink refused
    pub fn failed_appends(&self) -> u64 {
        self.failed_appends.load(Ordering::Relaxed)
    }

    pub fn head(&self) -> ChainHead {
        self.head.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("head", &self.head())
            .field("failed_appends", &self.failed_appends())
            .finish()
    }
}

// =============================================================================
// Reading, verification and queries
// =============================================================================

/// Load every record from an NDJSON audit file (missing file = empty log)
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AuditError::Open {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
            line: index + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// First inconsistency found while walking a chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainBreak {
    #[error("record {index}: expected seq {expected}, found {found}")]
    Sequence { index: usize, expected: u64, found: u64 },

    #[error("record {index} (seq {seq}): prev_hash does not match the previous record")]
    Link { index: usize, seq: u64 },

    #[error("record {index} (seq {seq}): content hash mismatch")]
    Content { index: usize, seq: u64 },
}

/// Verify a chain of records, in order
///
/// The first record may link to any hash so a rotated tail can be verified
/// on its own; every later record must link to its predecessor.
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), ChainBreak> {
    let mut previous: Option<&AuditRecord> = None;
    for (index, record) in records.iter().enumerate() {
        if record.compute_hash() != record.hash {
            return Err(ChainBreak::Content {
                index,
                seq: record.seq,
            });
        }
        if let Some(prev) = previous {
            if record.seq != prev.seq + 1 {
                return Err(ChainBreak::Sequence {
                    index,
                    expected: prev.seq + 1,
                    found: record.seq,
                });
            }
            if record.prev_hash != prev.hash {
                return Err(ChainBreak::Link {
                    index,
                    seq: record.seq,
                });
            }
        } else if record.seq == 1 && record.prev_hash != GENESIS_HASH {
            return Err(ChainBreak::Link {
                index,
                seq: record.seq,
            });
        }
        previous = Some(record);
    }
    Ok(())
}

/// Filter over audit records; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub tool: Option<String>,
    pub caller_id: Option<String>,
    pub decision: Option<Decision>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.tool.as_deref().map_or(true, |t| record.tool == t)
            && self.caller_id.as_deref().map_or(true, |c| record.caller_id == c)
            && self.decision.map_or(true, |d| record.decision == d)
            && self.since.map_or(true, |s| record.ts >= s)
            && self.until.map_or(true, |u| record.ts <= u)
    }

    pub fn filter<'a>(&self, records: &'a [AuditRecord]) -> Vec<&'a AuditRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::Duration;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn entry(caller: &str, decision: Decision) -> AuditEntry {
        AuditEntry {
            caller_id: caller.to_string(),
            tool: "read_document".to_string(),
            decision,
            reason: match decision {
                Decision::Allow => None,
                Decision::Deny => Some(DenialReason::InvalidInput),
            },
            code: match decision {
                Decision::Allow => None,
                Decision::Deny => Some(ReasonCode::Empty),
            },
            stage: Stage::Decided,
            detail: String::new(),
        }
    }

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn append(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".to_string()))
        }
    }

    #[test]
    fn test_file_sink_appends_ndjson() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("audit.ndjson");

        let log = AuditLog::new(FileAuditSink::open(&path).unwrap(), Arc::new(SystemClock)).unwrap();
        log.record(entry("client-1", Decision::Allow)).unwrap();
        log.record(entry("client-1", Decision::Deny)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"decision\":\"deny\""));
        assert!(content.contains("\"code\":\"empty\""));

        let records = read_records(&path).unwrap();
        assert_eq!(records[0].seq, 1);
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert!(verify_chain(&records).is_ok());
    }

    #[test]
    fn test_chain_resumes_after_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.ndjson");

        {
            let log = AuditLog::new(FileAuditSink::open(&path).unwrap(), Arc::new(SystemClock)).unwrap();
            log.record(entry("a", Decision::Allow));
        }
        let log = AuditLog::new(FileAuditSink::open(&path).unwrap(), Arc::new(SystemClock)).unwrap();
        assert_eq!(log.head().seq, 1);
        log.record(entry("a", Decision::Deny));

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(verify_chain(&records).is_ok());
    }

    #[test]
    fn test_tampering_is_detected() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone(), Arc::new(SystemClock)).unwrap();
        for _ in 0..3 {
            log.record(entry("a", Decision::Deny));
        }

        let mut records = sink.records();
        assert!(verify_chain(&records).is_ok());

        records[1].decision = Decision::Allow;
        assert_eq!(
            verify_chain(&records),
            Err(ChainBreak::Content { index: 1, seq: 2 })
        );

        let mut dropped = sink.records();
        dropped.remove(1);
        assert!(matches!(
            verify_chain(&dropped),
            Err(ChainBreak::Sequence { index: 1, .. })
        ));
    }

    #[test]
    fn test_sink_failure_does_not_advance_chain() {
        let log = AuditLog::new(BrokenSink, Arc::new(SystemClock)).unwrap();

        assert!(log.record(entry("a", Decision::Allow)).is_none());
        assert!(log.record(entry("a", Decision::Deny)).is_none());

        assert_eq!(log.failed_appends(), 2);
        assert_eq!(log.head(), ChainHead::default());
    }

    #[test]
    fn test_concurrent_records_stay_linear() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone(), Arc::new(SystemClock)).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let log = &log;
                s.spawn(move || {
                    for _ in 0..25 {
                        log.record(entry(&format!("caller-{}", t), Decision::Allow));
                    }
                });
            }
        });

        let records = sink.records();
        assert_eq!(records.len(), 100);
        assert!(verify_chain(&records).is_ok());
    }

    #[test]
    fn test_query_filters() {
        let clock = Arc::new(ManualClock::default());
        let start = clock.now();
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(sink.clone(), clock.clone()).unwrap();

        log.record(entry("a", Decision::Allow));
        clock.advance(Duration::minutes(5));
        log.record(entry("b", Decision::Deny));
        clock.advance(Duration::minutes(5));
        log.record(entry("a", Decision::Deny));

        let records = sink.records();

        let by_caller = AuditQuery {
            caller_id: Some("a".to_string()),
            ..Default::default()
        };
        assert_eq!(by_caller.filter(&records).len(), 2);

        let denies = AuditQuery {
            decision: Some(Decision::Deny),
            ..Default::default()
        };
        assert_eq!(denies.filter(&records).len(), 2);

        let window = AuditQuery {
            since: Some(start + Duration::minutes(1)),
            until: Some(start + Duration::minutes(6)),
            ..Default::default()
        };
        let hits = window.filter(&records);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].caller_id, "b");

        let other_tool = AuditQuery {
            tool: Some("delete_document".to_string()),
            ..Default::default()
        };
        assert!(other_tool.filter(&records).is_empty());
    }

    #[test]
    fn test_malformed_line_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.ndjson");
        std::fs::write(&path, "{not json}\n").unwrap();

        let result = read_records(&path);
        assert!(matches!(result, Err(AuditError::Malformed { line: 1, .. })));
    }

    #[test]
    fn test_torn_tail_does_not_block_restart() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.ndjson");

        let first = {
            let log = AuditLog::new(FileAuditSink::open(&path).unwrap(), Arc::new(SystemClock)).unwrap();
            log.record(entry("a", Decision::Allow)).unwrap()
        };
        // Crash in the middle of the next line
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"record_id\":\"").unwrap();
        drop(file);

        let log = AuditLog::new(FileAuditSink::open(&path).unwrap(), Arc::new(SystemClock)).unwrap();
        assert_eq!(log.head().seq, 1);
        let next = log.record(entry("a", Decision::Deny)).unwrap();
        assert_eq!(next.seq, 2);
        assert_eq!(next.prev_hash, first.hash);

        // The new record starts on its own line after the fragment
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: AuditRecord = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.hash, next.hash);
        assert!(matches!(
            read_records(&path),
            Err(AuditError::Malformed { line: 2, .. })
        ));
    }

    /// Accepts a few bytes then fails while `failing` is set
    struct FlakyDisk {
        data: Arc<Mutex<Vec<u8>>>,
        failing: Arc<AtomicBool>,
        partial_written: bool,
    }

    impl Write for FlakyDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.failing.load(Ordering::SeqCst) {
                if !self.partial_written {
                    self.partial_written = true;
                    let n = buf.len().min(5);
                    self.data.lock().unwrap().extend_from_slice(&buf[..n]);
                    return Ok(n);
                }
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"));
            }
            self.data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_never_reaches_disk_later() {
        let data = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(AtomicBool::new(false));
        let sink = FileAuditSink::with_writer(
            PathBuf::from("unused.ndjson"),
            Box::new(FlakyDisk {
                data: data.clone(),
                failing: failing.clone(),
                partial_written: false,
            }),
            false,
        );
        let log = AuditLog::new(sink, Arc::new(SystemClock)).unwrap();

        assert!(log.record(entry("a", Decision::Allow)).is_some());
        failing.store(true, Ordering::SeqCst);
        assert!(log.record(entry("a", Decision::Allow)).is_none());
        assert!(log.record(entry("a", Decision::Deny)).is_none());
        failing.store(false, Ordering::SeqCst);
        assert!(log.record(entry("a", Decision::Deny)).is_some());
        assert_eq!(log.failed_appends(), 2);

        let content = String::from_utf8(data.lock().unwrap().clone()).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(verify_chain(&records).is_ok());
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_records(&temp.path().join("none.ndjson")).unwrap().is_empty());
    }
}
