//! Input Validators - Named Checks for Tool Arguments
//!
//! Each check takes a raw JSON value plus the parameter name and returns a
//! `ValidationOutcome`. Checks are declared per argument in the tool schema
//! and run in order until the first failure.
//!
//! # Built-in validators
//!
//! | Name | Fails when |
//! |---|---|
//! | `non-empty` | value is null, blank after trimming, or an empty array/object |
//! | `enum-membership` | value is not exactly one of the configured strings |
//! | `numeric-range` | value is not a number or falls outside `[min, max]` |
//! | `structured-text` | value does not parse as JSON (or TOML) |
//! | `positive-integer` | value is not an integer ≥ 1 |
//! | `no-injection` | value contains a blacklisted substring |
//! | `max-length` | string is longer than `max` characters |
//!
//! Custom validators are registered by name and referenced with
//! `{ kind = "custom", name = "..." }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Substrings that are always rejected by `no-injection`
///
/// Matching is case-sensitive substring search, so both casings of
/// percent-encodings are listed.
pub const DEFAULT_INJECTION_PATTERNS: &[&str] = &[
    // path traversal
    "../",
    "..\\",
    "%2e%2e",
    "%2E%2E",
    "%2f",
    "%2F",
    "\0",
    // template injection
    "{{",
    "{%",
    "${",
    "#{",
    // markup injection
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
    // code execution
    "__import__",
    "eval(",
    "exec(",
    "os.system",
    "subprocess",
    "$(",
    "`",
    "; rm ",
    "&& ",
    "| sh",
];

/// Why a validator rejected a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    UnknownTool,
    MalformedArguments,
    MissingArgument,
    UnexpectedArgument,
    Empty,
    NotInSet,
    NotANumber,
    OutOfRange,
    Malformed,
    NotPositiveInteger,
    InjectionPattern,
    TooLong,
    Policy,
    InternalFault,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::UnknownTool => "unknown_tool",
            ReasonCode::MalformedArguments => "malformed_arguments",
            ReasonCode::MissingArgument => "missing_argument",
            ReasonCode::UnexpectedArgument => "unexpected_argument",
            ReasonCode::Empty => "empty",
            ReasonCode::NotInSet => "not_in_set",
            ReasonCode::NotANumber => "not_a_number",
            ReasonCode::OutOfRange => "out_of_range",
            ReasonCode::Malformed => "malformed",
            ReasonCode::NotPositiveInteger => "not_positive_integer",
            ReasonCode::InjectionPattern => "injection_pattern",
            ReasonCode::TooLong => "too_long",
            ReasonCode::Policy => "policy",
            ReasonCode::InternalFault => "internal_fault",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub code: ReasonCode,
    pub detail: String,
}

/// Result of one validator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Pass,
    Fail(ValidationFailure),
}

impl ValidationOutcome {
    pub fn fail(code: ReasonCode, detail: impl Into<String>) -> Self {
        ValidationOutcome::Fail(ValidationFailure {
            code,
            detail: detail.into(),
        })
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationOutcome::Pass)
    }

    pub fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            ValidationOutcome::Pass => None,
            ValidationOutcome::Fail(failure) => Some(failure),
        }
    }
}

/// Text formats accepted by `structured-text`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Json,
    Toml,
}

/// One check declared on an argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Check {
    NonEmpty,
    EnumMembership {
        values: Vec<String>,
    },
    NumericRange {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    StructuredText {
        #[serde(default)]
        format: TextFormat,
    },
    PositiveInteger,
    NoInjection,
    MaxLength {
        max: usize,
    },
    Custom {
        name: String,
    },
}

impl Check {
    /// Validator name this check dispatches to
    pub fn validator_name(&self) -> &str {
        match self {
            Check::NonEmpty => "non-empty",
            Check::EnumMembership { .. } => "enum-membership",
            Check::NumericRange { .. } => "numeric-range",
            Check::StructuredText { .. } => "structured-text",
            Check::PositiveInteger => "positive-integer",
            Check::NoInjection => "no-injection",
            Check::MaxLength { .. } => "max-length",
            Check::Custom { name } => name,
        }
    }
}

/// Externally supplied validator, registered by name
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, value: &Value, param: &str) -> ValidationOutcome;
}

impl<F> ArgumentValidator for F
where
    F: Fn(&Value, &str) -> ValidationOutcome + Send + Sync,
{
    fn validate(&self, value: &Value, param: &str) -> ValidationOutcome {
        self(value, param)
    }
}

const BUILTIN_NAMES: &[&str] = &[
    "non-empty",
    "enum-membership",
    "numeric-range",
    "structured-text",
    "positive-integer",
    "no-injection",
    "max-length",
];

/// Validator library: built-in checks, the injection blacklist and custom validators
#[derive(Clone)]
pub struct InputValidators {
    injection_patterns: Vec<String>,
    custom: BTreeMap<String, Arc<dyn ArgumentValidator>>,
}

impl fmt::Debug for InputValidators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputValidators")
            .field("injection_patterns", &self.injection_patterns.len())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for InputValidators {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InputValidators {
    /// Built-in blacklist extended with `extra_patterns`
    pub fn new(extra_patterns: Vec<String>) -> Self {
        let mut injection_patterns: Vec<String> = DEFAULT_INJECTION_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        for pattern in extra_patterns {
            if !pattern.is_empty() && !injection_patterns.contains(&pattern) {
                injection_patterns.push(pattern);
            }
        }
        Self {
            injection_patterns,
            custom: BTreeMap::new(),
        }
    }

    /// Register a custom validator; built-in names cannot be shadowed
    pub fn register(&mut self, name: impl Into<String>, validator: impl ArgumentValidator + 'static) -> bool {
        let name = name.into();
        if BUILTIN_NAMES.contains(&name.as_str()) {
            return false;
        }
        self.custom.insert(name, Arc::new(validator));
        true
    }

    /// All validator names known to this library
    pub fn names(&self) -> Vec<&str> {
        BUILTIN_NAMES
            .iter()
            .copied()
            .chain(self.custom.keys().map(|k| k.as_str()))
            .collect()
    }

    pub fn has_validator(&self, name: &str) -> bool {
        BUILTIN_NAMES.contains(&name) || self.custom.contains_key(name)
    }

    pub fn injection_patterns(&self) -> &[String] {
        &self.injection_patterns
    }

    /// Run a single check
    pub fn run(&self, check: &Check, value: &Value, param: &str) -> ValidationOutcome {
        match check {
            Check::NonEmpty => non_empty(value, param),
            Check::EnumMembership { values } => enum_membership(value, param, values),
            Check::NumericRange { min, max } => numeric_range(value, param, *min, *max),
            Check::StructuredText { format } => structured_text(value, param, *format),
            Check::PositiveInteger => positive_integer(value, param),
            Check::NoInjection => self.no_injection(value, param),
            Check::MaxLength { max } => max_length(value, param, *max),
            Check::Custom { name } => match self.custom.get(name) {
                Some(validator) => validator.validate(value, param),
                None => ValidationOutcome::fail(
                    ReasonCode::InternalFault,
                    format!("no validator registered as '{}'", name),
                ),
            },
        }
    }

    /// Run checks in order, stopping at the first failure
    pub fn run_all(&self, checks: &[Check], value: &Value, param: &str) -> ValidationOutcome {
        for check in checks {
            let outcome = self.run(check, value, param);
            if !outcome.is_pass() {
                return outcome;
            }
        }
        ValidationOutcome::Pass
    }

    fn no_injection(&self, value: &Value, param: &str) -> ValidationOutcome {
        let mut hit = None;
        visit_strings(value, &mut |s: &str| {
            if hit.is_none() {
                hit = self
                    .injection_patterns
                    .iter()
                    .find(|p| s.contains(p.as_str()))
                    .cloned();
            }
        });
        match hit {
            Some(pattern) => ValidationOutcome::fail(
                ReasonCode::InjectionPattern,
                format!("{} contains blocked pattern {:?}", param, pattern),
            ),
            None => ValidationOutcome::Pass,
        }
    }
}

/// Call `f` on every string leaf and object key in `value`
fn visit_strings(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| visit_strings(v, f)),
        Value::Object(map) => {
            for (key, v) in map {
                f(key);
                visit_strings(v, f);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn non_empty(value: &Value, param: &str) -> ValidationOutcome {
    let empty = match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };
    if empty {
        ValidationOutcome::fail(ReasonCode::Empty, format!("{} must not be empty", param))
    } else {
        ValidationOutcome::Pass
    }
}

fn enum_membership(value: &Value, param: &str, allowed: &[String]) -> ValidationOutcome {
    match value.as_str() {
        Some(s) if allowed.iter().any(|a| a == s) => ValidationOutcome::Pass,
        _ => ValidationOutcome::fail(
            ReasonCode::NotInSet,
            format!("{} must be one of [{}]", param, allowed.join(", ")),
        ),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn numeric_range(value: &Value, param: &str, min: Option<f64>, max: Option<f64>) -> ValidationOutcome {
    let Some(number) = as_number(value) else {
        return ValidationOutcome::fail(
            ReasonCode::NotANumber,
            format!("{} must be a number", param),
        );
    };
    let below = min.is_some_and(|m| number < m);
    let above = max.is_some_and(|m| number > m);
    if below || above {
        let lo = min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".to_string());
        let hi = max.map(|m| m.to_string()).unwrap_or_else(|| "inf".to_string());
        return ValidationOutcome::fail(
            ReasonCode::OutOfRange,
            format!("{} must be within [{}, {}], got {}", param, lo, hi, number),
        );
    }
    ValidationOutcome::Pass
}

fn structured_text(value: &Value, param: &str, format: TextFormat) -> ValidationOutcome {
    let text = match value {
        Value::Object(_) | Value::Array(_) => return ValidationOutcome::Pass,
        Value::String(s) => s,
        _ => {
            return ValidationOutcome::fail(
                ReasonCode::Malformed,
                format!("{} must be structured text", param),
            )
        }
    };
    let parsed = match format {
        TextFormat::Json => serde_json::from_str::<Value>(text).map_err(|e| e.to_string()),
        TextFormat::Toml => toml::from_str::<toml::Table>(text)
            .map(|_| Value::Null)
            .map_err(|e| e.message().to_string()),
    };
    match parsed {
        Ok(_) => ValidationOutcome::Pass,
        Err(e) => ValidationOutcome::fail(
            ReasonCode::Malformed,
            format!("{} is not well-formed {:?}: {}", param, format, e),
        ),
    }
}

fn positive_integer(value: &Value, param: &str) -> ValidationOutcome {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 1 => ValidationOutcome::Pass,
        _ => ValidationOutcome::fail(
            ReasonCode::NotPositiveInteger,
            format!("{} must be an integer >= 1", param),
        ),
    }
}

fn max_length(value: &Value, param: &str, max: usize) -> ValidationOutcome {
    match value {
        Value::String(s) if s.chars().count() > max => ValidationOutcome::fail(
            ReasonCode::TooLong,
            format!("{} exceeds {} characters", param, max),
        ),
        _ => ValidationOutcome::Pass,
    }
}
