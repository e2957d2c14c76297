//! Gate - Admission Pipeline for Tool Calls
//!
//! Every call walks a fixed sequence of checks:
//!
//! ```text
//! Received -> RateChecked -> InputValidated -> PathValidated -> Decided
//!     |            |               |                |
//!     +-- deny ----+----- deny ----+----- deny -----+--> Denied
//! ```
//!
//! 1. Rate limit (cheapest, blocks abuse before any validation work)
//! 2. Argument shape and per-argument checks in declared order
//! 3. Path resolution for each path-bearing argument pair
//!
//! Whatever the outcome, exactly one audit record is written before the
//! caller sees the result. Only allowed calls reach the tool handler.

use crate::audit::{AuditEntry, AuditError, AuditLog, AuditSink, FileAuditSink, MemoryAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, GateConfig, ToolSchema};
use crate::path_guard::{PathError, PathGuard, ResolvedPath};
use crate::rate_limit::RateLimiter;
use crate::validators::{ArgumentValidator, InputValidators, ReasonCode, ValidationOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// =============================================================================
// Decision vocabulary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}

/// Why a call was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// Caller exceeded its admission quota; retry after `retry_at`
    RateLimited,
    InvalidInput,
    InvalidCategory,
    InvalidIdentifier,
    PathTraversal,
}

impl DenialReason {
    /// Path denials usually mean someone is probing the store
    pub fn is_path_related(self) -> bool {
        matches!(
            self,
            DenialReason::InvalidCategory | DenialReason::InvalidIdentifier | DenialReason::PathTraversal
        )
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DenialReason::RateLimited => "RateLimited",
            DenialReason::InvalidInput => "InvalidInput",
            DenialReason::InvalidCategory => "InvalidCategory",
            DenialReason::InvalidIdentifier => "InvalidIdentifier",
            DenialReason::PathTraversal => "PathTraversal",
        };
        f.write_str(name)
    }
}

/// Last pipeline state a call reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    RateChecked,
    InputValidated,
    PathValidated,
    Decided,
}

// =============================================================================
// Calls and results
// =============================================================================

/// Inbound call as supplied by an untrusted caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub caller_id: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, caller_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            caller_id: caller_id.into(),
            arguments,
        }
    }
}

/// A call that passed every check
///
/// Path-bearing argument pairs are replaced in `arguments` by the resolved
/// absolute path under the binding name.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedCall {
    pub tool: String,
    pub caller_id: String,
    pub arguments: Map<String, Value>,
    pub paths: BTreeMap<String, ResolvedPath>,
}

impl ValidatedCall {
    pub fn path(&self, name: &str) -> Option<&ResolvedPath> {
        self.paths.get(name)
    }
}

/// Structured denial returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Denial {
    pub decision: Decision,
    pub reason: DenialReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ReasonCode>,
    pub detail: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

impl Denial {
    fn new(reason: DenialReason, code: Option<ReasonCode>, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason,
            code,
            detail: detail.into(),
            stage,
            retry_at: None,
        }
    }

    fn input(code: ReasonCode, detail: impl Into<String>) -> Self {
        Self::new(DenialReason::InvalidInput, Some(code), Stage::RateChecked, detail)
    }

    fn path(err: PathError) -> Self {
        let reason = match &err {
            PathError::InvalidCategory { .. } => DenialReason::InvalidCategory,
            PathError::InvalidIdentifier { .. } => DenialReason::InvalidIdentifier,
            PathError::PathTraversal { .. } | PathError::Io { .. } => DenialReason::PathTraversal,
        };
        Self::new(reason, None, Stage::InputValidated, err.to_string())
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.reason, code, self.detail),
            None => write!(f, "{}: {}", self.reason, self.detail),
        }
    }
}

/// Result of `Gate::evaluate`
#[derive(Debug)]
pub enum GateOutcome {
    /// Handler result, passed through unmodified
    Forwarded(anyhow::Result<Value>),
    Denied(Denial),
}

impl GateOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, GateOutcome::Denied(_))
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            GateOutcome::Denied(denial) => Some(denial),
            GateOutcome::Forwarded(_) => None,
        }
    }
}

/// External tool business logic, invoked only for admitted calls
pub trait ToolHandler: Send + Sync {
    fn handle(&self, call: &ValidatedCall) -> anyhow::Result<Value>;
}

impl<F> ToolHandler for F
where
    F: Fn(&ValidatedCall) -> anyhow::Result<Value> + Send + Sync,
{
    fn handle(&self, call: &ValidatedCall) -> anyhow::Result<Value> {
        self(call)
    }
}

struct NoHandler;

impl ToolHandler for NoHandler {
    fn handle(&self, call: &ValidatedCall) -> anyhow::Result<Value> {
        anyhow::bail!("no tool handler installed for '{}'", call.tool)
    }
}

// =============================================================================
// Construction
// =============================================================================

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage root unusable: {0}")]
    Path(#[from] PathError),

    #[error("Audit sink unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("Validator name '{0}' is reserved for a built-in check")]
    ReservedValidator(String),

    #[error("tools.{tool}.{arg}: no validator registered as '{name}'")]
    UnknownValidator { tool: String, arg: String, name: String },
}

/// Assembles a `Gate` from configuration plus runtime collaborators
pub struct GateBuilder {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    validators: InputValidators,
    reserved: Vec<String>,
    sink: Option<Box<dyn AuditSink>>,
    handler: Box<dyn ToolHandler>,
}

impl GateBuilder {
    pub fn new(config: GateConfig) -> Self {
        let validators = InputValidators::new(config.injection.extra_patterns.clone());
        Self {
            config,
            clock: Arc::new(SystemClock),
            validators,
            reserved: Vec::new(),
            sink: None,
            handler: Box::new(NoHandler),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a custom validator referenced as `{ kind = "custom", name = ... }`
    pub fn validator(mut self, name: impl Into<String>, validator: impl ArgumentValidator + 'static) -> Self {
        let name = name.into();
        if !self.validators.register(name.clone(), validator) {
            self.reserved.push(name);
        }
        self
    }

    /// Override the audit sink chosen from `[audit]`
    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn build(self) -> Result<Gate, GateError> {
        self.config.validate()?;

        if let Some(name) = self.reserved.into_iter().next() {
            return Err(GateError::ReservedValidator(name));
        }
        for (tool, schema) in &self.config.tools {
            for arg in &schema.args {
                for check in &arg.checks {
                    let name = check.validator_name();
                    if !self.validators.has_validator(name) {
                        return Err(GateError::UnknownValidator {
                            tool: tool.clone(),
                            arg: arg.name.clone(),
                            name: name.to_string(),
                        });
                    }
                }
            }
        }

        let storage = &self.config.storage;
        let paths = PathGuard::new(
            &storage.root,
            storage.extension.clone(),
            storage.categories.clone(),
            self.config.identifier.clone(),
        )?;

        let sink: Box<dyn AuditSink> = match (self.sink, &self.config.audit.path) {
            (Some(sink), _) => sink,
            (None, Some(path)) => Box::new(FileAuditSink::open(path)?),
            (None, None) => Box::new(MemoryAuditSink::new()),
        };
        let audit = AuditLog::new(sink, self.clock.clone())?;
        let limiter = RateLimiter::new(self.config.rate_limit.settings(), self.clock);

        info!(
            "Gate ready: {} tools, {} calls per {}s, root {}",
            self.config.tools.len(),
            limiter.capacity(),
            limiter.window().num_seconds(),
            paths.root().display()
        );

        Ok(Gate {
            tools: self.config.tools,
            limiter,
            validators: self.validators,
            paths,
            audit,
            handler: self.handler,
        })
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Orchestrates rate limiting, validation, path resolution and audit
///
/// Holds no lock across the pipeline; each component serializes only its
/// own shared state, so one `Gate` can serve many threads.
pub struct Gate {
    tools: BTreeMap<String, ToolSchema>,
    limiter: RateLimiter,
    validators: InputValidators,
    paths: PathGuard,
    audit: AuditLog,
    handler: Box<dyn ToolHandler>,
}

impl Gate {
    pub fn builder(config: GateConfig) -> GateBuilder {
        GateBuilder::new(config)
    }

    /// Run the pipeline and forward admitted calls to the handler
    pub fn evaluate(&self, call: &ToolCall) -> GateOutcome {
        match self.admit_call(call) {
            Ok(validated) => GateOutcome::Forwarded(self.handler.handle(&validated)),
            Err(denial) => GateOutcome::Denied(denial),
        }
    }

    /// Run the pipeline and audit the decision without forwarding
    pub fn admit_call(&self, call: &ToolCall) -> Result<ValidatedCall, Denial> {
        let verdict = if self.limiter.admit(&call.caller_id) {
            // A panicking check must deny, never let the call through
            panic::catch_unwind(AssertUnwindSafe(|| self.check(call))).unwrap_or_else(|_| {
                error!(
                    caller = %call.caller_id,
                    tool = %call.tool,
                    "Validation panicked; denying call"
                );
                Err(Denial::input(
                    ReasonCode::InternalFault,
                    "internal error while validating arguments",
                ))
            })
        } else {
            let retry_at = self.limiter.reset_at(&call.caller_id);
            let mut denial = Denial::new(
                DenialReason::RateLimited,
                None,
                Stage::Received,
                format!(
                    "rate limit of {} calls per {}s exceeded",
                    self.limiter.capacity(),
                    self.limiter.window().num_seconds()
                ),
            );
            denial.retry_at = Some(retry_at);
            Err(denial)
        };

        match &verdict {
            Ok(validated) => {
                debug!(caller = %call.caller_id, tool = %call.tool, "Call admitted");
                self.audit.record(AuditEntry {
                    caller_id: call.caller_id.clone(),
                    tool: call.tool.clone(),
                    decision: Decision::Allow,
                    reason: None,
                    code: None,
                    stage: Stage::Decided,
                    detail: describe_paths(&validated.paths),
                });
            }
            Err(denial) => {
                if denial.reason.is_path_related() {
                    warn!(caller = %call.caller_id, tool = %call.tool, "Path denied: {}", denial);
                } else {
                    info!(caller = %call.caller_id, tool = %call.tool, "Call denied: {}", denial);
                }
                self.audit.record(AuditEntry {
                    caller_id: call.caller_id.clone(),
                    tool: call.tool.clone(),
                    decision: Decision::Deny,
                    reason: Some(denial.reason),
                    code: denial.code,
                    stage: denial.stage,
                    detail: denial.detail.clone(),
                });
            }
        }
        verdict
    }

    pub fn tools(&self) -> &BTreeMap<String, ToolSchema> {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn path_guard(&self) -> &PathGuard {
        &self.paths
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Checks after the rate limit: argument shape, validators, paths
    fn check(&self, call: &ToolCall) -> Result<ValidatedCall, Denial> {
        let schema = self.tools.get(&call.tool).ok_or_else(|| {
            Denial::input(ReasonCode::UnknownTool, format!("unknown tool '{}'", call.tool))
        })?;

        let mut arguments = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(Denial::input(
                    ReasonCode::MalformedArguments,
                    format!("arguments must be an object, got {}", json_kind(other)),
                ))
            }
        };

        self.validate_arguments(schema, &arguments)?;

        let mut paths = BTreeMap::new();
        for binding in &schema.paths {
            let category = arguments.get(&binding.category).and_then(Value::as_str);
            let identifier = arguments.get(&binding.identifier).and_then(Value::as_str);
            let (category, identifier) = match (category, identifier) {
                (Some(c), Some(i)) => (c, i),
                // Both halves are optional and absent
                _ => continue,
            };

            let resolved = self.paths.resolve(category, identifier).map_err(Denial::path)?;
            paths.insert(binding.name.clone(), resolved);
        }

        for binding in &schema.paths {
            if let Some(resolved) = paths.get(&binding.name) {
                arguments.remove(&binding.category);
                arguments.remove(&binding.identifier);
                arguments.insert(
                    binding.name.clone(),
                    Value::String(resolved.as_path().display().to_string()),
                );
            }
        }

        Ok(ValidatedCall {
            tool: call.tool.clone(),
            caller_id: call.caller_id.clone(),
            arguments,
            paths,
        })
    }

    fn validate_arguments(&self, schema: &ToolSchema, arguments: &Map<String, Value>) -> Result<(), Denial> {
        if let Some(extra) = arguments.keys().find(|k| schema.arg(k).is_none()) {
            return Err(Denial::input(
                ReasonCode::UnexpectedArgument,
                format!("unexpected argument '{}'", extra),
            ));
        }

        for spec in &schema.args {
            let value = match arguments.get(&spec.name) {
                Some(Value::Null) | None if spec.required => {
                    return Err(Denial::input(
                        ReasonCode::MissingArgument,
                        format!("missing required argument '{}'", spec.name),
                    ))
                }
                Some(Value::Null) | None => continue,
                Some(value) => value,
            };

            if let ValidationOutcome::Fail(failure) = self.validators.run_all(&spec.checks, value, &spec.name) {
                return Err(Denial::input(failure.code, failure.detail));
            }
        }

        // Path components must be usable as a pair of strings
        for binding in &schema.paths {
            let category = present(arguments, &binding.category);
            let identifier = present(arguments, &binding.identifier);
            for (name, value) in [(&binding.category, category), (&binding.identifier, identifier)] {
                if let Some(value) = value {
                    if !value.is_string() {
                        return Err(Denial::input(
                            ReasonCode::Malformed,
                            format!("{} must be a string, got {}", name, json_kind(value)),
                        ));
                    }
                }
            }
            match (category, identifier) {
                (Some(_), None) => {
                    return Err(Denial::input(
                        ReasonCode::MissingArgument,
                        format!("'{}' requires '{}'", binding.category, binding.identifier),
                    ))
                }
                (None, Some(_)) => {
                    return Err(Denial::input(
                        ReasonCode::MissingArgument,
                        format!("'{}' requires '{}'", binding.identifier, binding.category),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("limiter", &self.limiter)
            .field("paths", &self.paths)
            .field("audit", &self.audit)
            .finish()
    }
}

fn present<'a>(arguments: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    arguments.get(name).filter(|v| !v.is_null())
}

fn describe_paths(paths: &BTreeMap<String, ResolvedPath>) -> String {
    paths
        .iter()
        .map(|(name, path)| format!("{}={}", name, path))
        .collect::<Vec<_>>()
        .join(" ")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
