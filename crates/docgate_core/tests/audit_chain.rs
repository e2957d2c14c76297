//! Tamper detection on a real NDJSON audit file

use docgate_core::{
    read_records, verify_chain, AuditQuery, ChainBreak, Decision, FileAuditSink, Gate, GateConfig,
    ToolCall, ToolSchema,
};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write_trail(temp: &TempDir) -> std::path::PathBuf {
    let path = temp.path().join("audit.ndjson");
    let mut config = GateConfig::new(temp.path());
    config.rate_limit.capacity = 2;
    config.tools.insert("ping".to_string(), ToolSchema::default());

    let gate = Gate::builder(config)
        .audit_sink(FileAuditSink::open(&path).unwrap())
        .build()
        .unwrap();
    for caller in ["alice", "alice", "alice", "bob"] {
        let _ = gate.admit_call(&ToolCall::new("ping", caller, json!({})));
    }
    path
}

#[test]
fn test_untouched_trail_verifies() {
    let temp = TempDir::new().unwrap();
    let path = write_trail(&temp);

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 4);
    assert!(verify_chain(&records).is_ok());

    let denied = AuditQuery {
        decision: Some(Decision::Deny),
        ..Default::default()
    };
    let hits = denied.filter(&records);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].caller_id, "alice");
}

#[test]
fn test_edited_line_breaks_chain() {
    let temp = TempDir::new().unwrap();
    let path = write_trail(&temp);

    let content = fs::read_to_string(&path).unwrap();
    let tampered = content.replacen("\"decision\":\"deny\"", "\"decision\":\"allow\"", 1);
    assert_ne!(content, tampered);
    fs::write(&path, tampered).unwrap();

    let records = read_records(&path).unwrap();
    assert!(matches!(
        verify_chain(&records),
        Err(ChainBreak::Content { index: 2, .. })
    ));
}

#[test]
fn test_deleted_line_breaks_chain() {
    let temp = TempDir::new().unwrap();
    let path = write_trail(&temp);

    let content = fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, line)| line)
        .collect();
    fs::write(&path, kept.join("\n") + "\n").unwrap();

    let records = read_records(&path).unwrap();
    assert!(matches!(
        verify_chain(&records),
        Err(ChainBreak::Sequence { index: 1, expected: 2, found: 3 })
    ));
}
