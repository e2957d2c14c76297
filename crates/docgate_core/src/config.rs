//! Configuration for the gate
//!
//! Loaded once from TOML at startup, validated, then shared read-only.
//!
//! ```toml
//! [rate_limit]
//! capacity = 100
//! window_secs = 60
//!
//! [storage]
//! root = "/data"
//!
//! [tools.read_document]
//! description = "Read one stored document"
//!
//! [[tools.read_document.args]]
//! name = "category"
//! checks = [{ kind = "non-empty" }]
//!
//! [[tools.read_document.args]]
//! name = "id"
//! checks = [{ kind = "non-empty" }, { kind = "no-injection" }]
//!
//! [[tools.read_document.paths]]
//! name = "document"
//! category = "category"
//! identifier = "id"
//! ```

use crate::path_guard::{Category, IdentifierPolicy};
use crate::rate_limit::RateLimitSettings;
use crate::validators::Check;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_GRAMMAR_LEN: usize = 64;
const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Complete gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub identifier: IdentifierPolicy,

    #[serde(default)]
    pub injection: InjectionConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    /// Tool name -> declared argument schema
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls admitted per window
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_capacity() -> usize {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_shards() -> usize {
    16
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            shards: default_shards(),
        }
    }
}

impl RateLimitConfig {
    pub fn settings(&self) -> RateLimitSettings {
        let secs = self.window_secs.min(MAX_WINDOW_SECS) as i64;
        RateLimitSettings {
            capacity: self.capacity,
            window: chrono::Duration::seconds(secs),
            shards: self.shards,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Absolute storage root
    pub root: PathBuf,

    /// File extension appended to identifiers (no dot, empty for none)
    #[serde(default = "default_extension")]
    pub extension: Option<String>,

    /// Enabled categories; empty enables all of them
    #[serde(default)]
    pub categories: Vec<Category>,
}

fn default_extension() -> Option<String> {
    Some("json".to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Patterns blocked in addition to the built-in list
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// NDJSON audit file; records stay in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Declared argument schema of one tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub description: String,

    /// Arguments in validation order
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,

    /// Path-bearing argument pairs
    #[serde(default)]
    pub paths: Vec<PathBinding>,
}

impl ToolSchema {
    pub fn arg(&self, name: &str) -> Option<&ArgumentSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// True when `name` is consumed by a path binding
    pub fn is_path_component(&self, name: &str) -> bool {
        self.paths
            .iter()
            .any(|p| p.category == name || p.identifier == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Checks run in order until the first failure
    #[serde(default)]
    pub checks: Vec<Check>,
}

fn default_required() -> bool {
    true
}

/// A (category, identifier) argument pair resolved to one path
///
/// The handler receives the resolved path under `name`; the two source
/// arguments are removed from the forwarded argument map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBinding {
    pub name: String,
    pub category: String,
    pub identifier: String,
}

impl GateConfig {
    /// Config with default limits for `root` and no tools
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            storage: StorageConfig {
                root: root.into(),
                extension: default_extension(),
                categories: Vec::new(),
            },
            identifier: IdentifierPolicy::default(),
            injection: InjectionConfig::default(),
            audit: AuditConfig::default(),
            tools: BTreeMap::new(),
        }
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.capacity == 0 {
            return Err(invalid("rate_limit.capacity must be at least 1"));
        }
        if rl.window_secs == 0 || rl.window_secs > MAX_WINDOW_SECS {
            return Err(invalid(format!(
                "rate_limit.window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            )));
        }
        if rl.shards == 0 {
            return Err(invalid("rate_limit.shards must be at least 1"));
        }

        if !self.storage.root.is_absolute() {
            return Err(invalid(format!(
                "storage.root must be an absolute path, got {}",
                self.storage.root.display()
            )));
        }
        if let Some(ext) = &self.storage.extension {
            if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid(format!(
                    "storage.extension must be alphanumeric, got {:?}",
                    ext
                )));
            }
        }

        let sep = self.identifier.separator;
        if !sep.is_ascii_punctuation() || sep == '/' || sep == '\\' {
            return Err(invalid(format!(
                "identifier.separator {:?} must be ASCII punctuation other than '/' and '\\'",
                sep
            )));
        }
        for (field, len) in [
            ("suffix_len", self.identifier.suffix_len),
            ("max_prefix_len", self.identifier.max_prefix_len),
        ] {
            if len == 0 || len > MAX_GRAMMAR_LEN {
                return Err(invalid(format!(
                    "identifier.{} must be between 1 and {}",
                    field, MAX_GRAMMAR_LEN
                )));
            }
        }

        for (tool, schema) in &self.tools {
            validate_tool(tool, schema)?;
        }
        Ok(())
    }
}

fn validate_tool(tool: &str, schema: &ToolSchema) -> Result<(), ConfigError> {
    if tool.trim().is_empty() {
        return Err(invalid("tool names must not be empty"));
    }

    let mut names = HashSet::new();
    for arg in &schema.args {
        if !names.insert(arg.name.as_str()) {
            return Err(invalid(format!(
                "tools.{}: argument '{}' declared twice",
                tool, arg.name
            )));
        }
        for check in &arg.checks {
            validate_check(tool, &arg.name, check)?;
        }
    }

    let mut consumed = HashSet::new();
    let mut bound = HashSet::new();
    for binding in &schema.paths {
        for source in [&binding.category, &binding.identifier] {
            if !names.contains(source.as_str()) {
                return Err(invalid(format!(
                    "tools.{}: path '{}' references undeclared argument '{}'",
                    tool, binding.name, source
                )));
            }
            if !consumed.insert(source.as_str()) {
                return Err(invalid(format!(
                    "tools.{}: argument '{}' used by more than one path",
                    tool, source
                )));
            }
        }
        if !bound.insert(binding.name.as_str()) {
            return Err(invalid(format!(
                "tools.{}: path '{}' declared twice",
                tool, binding.name
            )));
        }
    }

    // A binding may reuse one of its own source names, never another argument's
    for binding in &schema.paths {
        let own = binding.name == binding.category || binding.name == binding.identifier;
        if names.contains(binding.name.as_str()) && !own {
            return Err(invalid(format!(
                "tools.{}: path '{}' shadows a declared argument",
                tool, binding.name
            )));
        }
    }
    Ok(())
}

fn validate_check(tool: &str, arg: &str, check: &Check) -> Result<(), ConfigError> {
    match check {
        Check::EnumMembership { values } if values.is_empty() => Err(invalid(format!(
            "tools.{}.{}: enum-membership needs at least one value",
            tool, arg
        ))),
        Check::NumericRange {
            min: Some(min),
            max: Some(max),
        } if min > max => Err(invalid(format!(
            "tools.{}.{}: numeric-range min {} exceeds max {}",
            tool, arg, min, max
        ))),
        Check::MaxLength { max: 0 } => Err(invalid(format!(
            "tools.{}.{}: max-length must be at least 1",
            tool, arg
        ))),
        Check::Custom { name } if name.trim().is_empty() => Err(invalid(format!(
            "tools.{}.{}: custom check needs a name",
            tool, arg
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::TextFormat;

    const SAMPLE: &str = r#"
[rate_limit]
capacity = 5
window_secs = 30

[storage]
root = "/data"
categories = ["roots", "document"]

[identifier]
separator = "-"
suffix_len = 8

[injection]
extra_patterns = ["DROP TABLE"]

[tools.read_document]
description = "Read one stored document"

[[tools.read_document.args]]
name = "category"
checks = [{ kind = "non-empty" }]

[[tools.read_document.args]]
name = "id"
checks = [{ kind = "non-empty" }, { kind = "no-injection" }]

[[tools.read_document.args]]
name = "limit"
required = false
checks = [{ kind = "numeric-range", min = 1, max = 500 }]

[[tools.read_document.paths]]
name = "document"
category = "category"
identifier = "id"

[tools.import]

[[tools.import.args]]
name = "payload"
checks = [{ kind = "structured-text", format = "toml" }]
"#;

    #[test]
    fn test_parse_sample() {
        let config = GateConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.rate_limit.capacity, 5);
        assert_eq!(config.rate_limit.shards, 16);
        assert_eq!(config.rate_limit.settings().window, chrono::Duration::seconds(30));
        assert_eq!(
            config.storage.categories,
            vec![Category::Roots, Category::Documents]
        );
        assert_eq!(config.storage.extension.as_deref(), Some("json"));
        assert_eq!(config.identifier.separator, '-');
        assert_eq!(config.identifier.suffix_len, 8);
        assert_eq!(config.identifier.max_prefix_len, 32);
        assert!(config.audit.path.is_none());

        let read = &config.tools["read_document"];
        assert_eq!(read.args.len(), 3);
        assert!(read.args[0].required);
        assert!(!read.arg("limit").unwrap().required);
        assert_eq!(
            read.arg("limit").unwrap().checks[0],
            Check::NumericRange {
                min: Some(1.0),
                max: Some(500.0)
            }
        );
        assert!(read.is_path_component("id"));
        assert!(!read.is_path_component("limit"));

        let import = &config.tools["import"];
        assert_eq!(
            import.args[0].checks[0],
            Check::StructuredText {
                format: TextFormat::Toml
            }
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = GateConfig::from_toml("[storage]\nroot = \"/srv/docs\"\n").unwrap();
        assert_eq!(config.rate_limit.capacity, 100);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.identifier, IdentifierPolicy::default());
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_missing_storage_is_parse_error() {
        assert!(matches!(
            GateConfig::from_toml("[rate_limit]\ncapacity = 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            "[rate_limit]\ncapacity = 0\n[storage]\nroot = \"/d\"\n",
            "[rate_limit]\nwindow_secs = 0\n[storage]\nroot = \"/d\"\n",
            "[storage]\nroot = \"relative/dir\"\n",
            "[storage]\nroot = \"/d\"\nextension = \"j.son\"\n",
            "[storage]\nroot = \"/d\"\n[identifier]\nseparator = \"/\"\n",
            "[storage]\nroot = \"/d\"\n[identifier]\nseparator = \"a\"\n",
            "[storage]\nroot = \"/d\"\n[identifier]\nsuffix_len = 0\n",
            "[storage]\nroot = \"/d\"\n[identifier]\nmax_prefix_len = 65\n",
        ];
        for case in cases {
            assert!(
                matches!(GateConfig::from_toml(case), Err(ConfigError::Invalid(_))),
                "expected rejection of:\n{}",
                case
            );
        }
    }

    #[test]
    fn test_rejects_bad_tool_schemas() {
        let mut config = GateConfig::new("/data");
        let arg = |name: &str, checks: Vec<Check>| ArgumentSpec {
            name: name.to_string(),
            description: String::new(),
            required: true,
            checks,
        };

        config.tools.insert(
            "dup".to_string(),
            ToolSchema {
                args: vec![arg("a", vec![]), arg("a", vec![])],
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        config.tools.clear();
        config.tools.insert(
            "unbound".to_string(),
            ToolSchema {
                args: vec![arg("category", vec![])],
                paths: vec![PathBinding {
                    name: "doc".to_string(),
                    category: "category".to_string(),
                    identifier: "id".to_string(),
                }],
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        config.tools.clear();
        config.tools.insert(
            "empty_enum".to_string(),
            ToolSchema {
                args: vec![arg("mode", vec![Check::EnumMembership { values: vec![] }])],
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        config.tools.clear();
        config.tools.insert(
            "inverted".to_string(),
            ToolSchema {
                args: vec![arg(
                    "n",
                    vec![Check::NumericRange {
                        min: Some(10.0),
                        max: Some(1.0),
                    }],
                )],
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        config.tools.clear();
        config.tools.insert(
            "shadow".to_string(),
            ToolSchema {
                args: vec![arg("c", vec![]), arg("i", vec![]), arg("other", vec![])],
                paths: vec![PathBinding {
                    name: "other".to_string(),
                    category: "c".to_string(),
                    identifier: "i".to_string(),
                }],
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_binding_may_reuse_own_argument_name() {
        let mut config = GateConfig::new("/data");
        config.tools.insert(
            "read".to_string(),
            ToolSchema {
                args: vec![
                    ArgumentSpec {
                        name: "category".to_string(),
                        description: String::new(),
                        required: true,
                        checks: vec![],
                    },
                    ArgumentSpec {
                        name: "id".to_string(),
                        description: String::new(),
                        required: true,
                        checks: vec![],
                    },
                ],
                paths: vec![PathBinding {
                    name: "id".to_string(),
                    category: "category".to_string(),
                    identifier: "id".to_string(),
                }],
                ..Default::default()
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = GateConfig::load(Path::new("/nonexistent/docgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
