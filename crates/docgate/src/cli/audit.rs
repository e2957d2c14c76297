//! `docgate audit` - verify and query an NDJSON audit trail

use super::output::{cell, print_table};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use comfy_table::Color;
use docgate_core::{read_records, verify_chain, AuditQuery, AuditRecord, Decision};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
pub enum AuditAction {
    /// Check the hash chain of an audit trail
    Verify {
        /// Audit trail (NDJSON)
        file: PathBuf,
    },

    /// List records matching the given filters
    Query {
        /// Audit trail (NDJSON)
        file: PathBuf,

        /// Only records for this tool
        #[arg(long)]
        tool: Option<String>,

        /// Only records for this caller
        #[arg(long)]
        caller: Option<String>,

        /// Only allowed or denied calls
        #[arg(long, value_enum)]
        decision: Option<DecisionArg>,

        /// Records at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Records at or before this time (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Keep only the last N matches
        #[arg(long)]
        limit: Option<usize>,

        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DecisionArg {
    Allow,
    Deny,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Allow => Decision::Allow,
            DecisionArg::Deny => Decision::Deny,
        }
    }
}

pub fn run(action: AuditAction) -> Result<ExitCode> {
    match action {
        AuditAction::Verify { file } => verify(&file),
        AuditAction::Query {
            file,
            tool,
            caller,
            decision,
            since,
            until,
            limit,
            json,
        } => {
            let query = AuditQuery {
                tool,
                caller_id: caller,
                decision: decision.map(Decision::from),
                since,
                until,
            };
            query_records(&file, &query, limit, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(file: &Path) -> Result<Vec<AuditRecord>> {
    read_records(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn verify(file: &Path) -> Result<ExitCode> {
    let records = load(file)?;
    match verify_chain(&records) {
        Ok(()) => {
            match records.last() {
                Some(last) => println!(
                    "Chain OK: {} record(s), head seq {} hash {}",
                    records.len(),
                    last.seq,
                    last.hash
                ),
                None => println!("Chain OK: no records"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(brk) => {
            println!("Chain BROKEN: {}", brk);
            Ok(ExitCode::from(1))
        }
    }
}

fn query_records(file: &Path, query: &AuditQuery, limit: Option<usize>, json: bool) -> Result<()> {
    let records = load(file)?;
    let mut matches = query.filter(&records);
    if let Some(limit) = limit {
        let skip = matches.len().saturating_sub(limit);
        matches.drain(..skip);
    }

    if json {
        for record in &matches {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if matches.is_empty() {
        println!("No matching records.");
        return Ok(());
    }

    let rows = matches
        .iter()
        .map(|r| {
            let decision_color = match r.decision {
                Decision::Allow => Color::Green,
                Decision::Deny => Color::Red,
            };
            vec![
                cell(r.seq.to_string()),
                cell(r.ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                cell(&r.caller_id),
                cell(&r.tool),
                (r.decision.to_string(), Some(decision_color)),
                cell(r.reason.map(|x| x.to_string()).unwrap_or_default()),
                cell(&r.detail),
            ]
        })
        .collect();
    print_table(
        &["SEQ", "TIME", "CALLER", "TOOL", "DECISION", "REASON", "DETAIL"],
        rows,
    );
    println!("{} of {} record(s)", matches.len(), records.len());
    Ok(())
}
