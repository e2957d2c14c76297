//! `docgate check-config` - validate a config and summarize it

use super::output::{cell, print_table};
use anyhow::{Context, Result};
use docgate_core::{Gate, GateConfig, MemoryAuditSink, ToolSchema};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ConfigSummary {
    config: String,
    root: String,
    categories: Vec<String>,
    rate_limit: RateLimitSummary,
    audit_path: Option<String>,
    tools: Vec<ToolSummary>,
}

#[derive(Debug, Serialize)]
struct RateLimitSummary {
    capacity: usize,
    window_secs: i64,
}

#[derive(Debug, Serialize)]
struct ToolSummary {
    name: String,
    args: Vec<String>,
    required: Vec<String>,
    paths: Vec<String>,
}

impl ToolSummary {
    fn new(name: &str, schema: &ToolSchema) -> Self {
        Self {
            name: name.to_string(),
            args: schema.args.iter().map(|a| a.name.clone()).collect(),
            required: schema
                .args
                .iter()
                .filter(|a| a.required)
                .map(|a| a.name.clone())
                .collect(),
            paths: schema
                .paths
                .iter()
                .map(|p| format!("{} = {}/{}", p.name, p.category, p.identifier))
                .collect(),
        }
    }
}

pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let config = GateConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let audit_path = config.audit.path.as_ref().map(|p| p.display().to_string());

    // The configured trail is left alone
    let gate = Gate::builder(config)
        .audit_sink(MemoryAuditSink::new())
        .build()
        .context("Configuration rejected")?;

    let summary = ConfigSummary {
        config: config_path.display().to_string(),
        root: gate.path_guard().root().display().to_string(),
        categories: gate
            .path_guard()
            .categories()
            .iter()
            .map(|c| c.to_string())
            .collect(),
        rate_limit: RateLimitSummary {
            capacity: gate.rate_limiter().capacity(),
            window_secs: gate.rate_limiter().window().num_seconds(),
        },
        audit_path,
        tools: gate
            .tools()
            .iter()
            .map(|(name, schema)| ToolSummary::new(name, schema))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Config OK: {}", summary.config);
    println!("Storage root: {}", summary.root);
    println!("Categories: {}", summary.categories.join(", "));
    println!(
        "Rate limit: {} calls per {}s per caller",
        summary.rate_limit.capacity, summary.rate_limit.window_secs
    );
    println!(
        "Audit trail: {}",
        summary.audit_path.as_deref().unwrap_or("(in memory)")
    );
    println!();

    if summary.tools.is_empty() {
        println!("No tools configured.");
        return Ok(());
    }

    let rows = summary
        .tools
        .iter()
        .map(|tool| {
            vec![
                cell(&tool.name),
                cell(tool.args.join(", ")),
                cell(tool.required.join(", ")),
                cell(tool.paths.join("\n")),
            ]
        })
        .collect();
    print_table(&["TOOL", "ARGS", "REQUIRED", "PATHS"], rows);
    Ok(())
}
