//! Dry-run tool handler
//!
//! Tool business logic lives outside this binary. The dry-run handler echoes
//! what the gate admitted so a deployment can be exercised end to end.

use docgate_core::{ToolHandler, ValidatedCall};
use serde_json::{json, Map, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunHandler;

impl ToolHandler for DryRunHandler {
    fn handle(&self, call: &ValidatedCall) -> anyhow::Result<Value> {
        let paths: Map<String, Value> = call
            .paths
            .iter()
            .map(|(name, path)| {
                let entry = json!({
                    "path": path.as_path().display().to_string(),
                    "category": path.category(),
                    "identifier": path.identifier(),
                    "exists": path.exists(),
                });
                (name.clone(), entry)
            })
            .collect();

        Ok(json!({
            "dry_run": true,
            "tool": call.tool,
            "caller_id": call.caller_id,
            "arguments": call.arguments,
            "paths": paths,
        }))
    }
}
