//! `docgate serve` - run the gate on stdio

use crate::handler::DryRunHandler;
use anyhow::{Context, Result};
use docgate_core::{Gate, GateConfig};
use docgate_mcp::{GateServer, GateServerConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(config_path: &Path) -> Result<()> {
    let config = GateConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let gate = Gate::builder(config)
        .handler(DryRunHandler)
        .build()
        .context("Failed to build gate")?;
    let gate = Arc::new(gate);

    info!(
        "Serving {} tool(s) from {}",
        gate.tools().len(),
        config_path.display()
    );

    let mut server = GateServer::new(GateServerConfig::default(), gate.clone());
    let result = server.run();

    let failed = gate.audit().failed_appends();
    if failed > 0 {
        warn!("{} audit record(s) could not be persisted this session", failed);
    }
    result
}
