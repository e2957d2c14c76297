//! Path Guard - Builds Storage Paths From (category, identifier) Pairs
//!
//! Callers never hand us a raw path. They name a storage category and an
//! opaque identifier; the guard checks both against closed grammars and then
//! composes `root/<category>/<identifier>.<ext>`.
//!
//! # Security Model
//!
//! - Category must be one of the closed `Category` variants (plural or singular spelling)
//! - Identifier must match the compiled identifier grammar exactly
//! - The composed path is canonicalized (symlinks, `.`, `..`) BEFORE the
//!   containment check, so a symlinked directory or file cannot escape root
//! - Dangling symlinks on the path are refused
//! - The root is canonicalized once at construction

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced while resolving a path request
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Invalid category: {category:?}")]
    InvalidCategory { category: String },

    #[error("Invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Path escapes storage root: {path}")]
    PathTraversal { path: String },

    #[error("Storage root {root} is unusable: {source}")]
    Io {
        root: String,
        #[source]
        source: io::Error,
    },
}

// =============================================================================
// Categories
// =============================================================================

/// Storage categories recognized by the document store
///
/// Adding a variant forces every `match` below to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Roots,
    Nodes,
    Edges,
    Documents,
    Attachments,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Roots,
        Category::Nodes,
        Category::Edges,
        Category::Documents,
        Category::Attachments,
    ];

    /// Parse a caller-supplied category (case-sensitive, plural or singular)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "roots" | "root" => Some(Category::Roots),
            "nodes" | "node" => Some(Category::Nodes),
            "edges" | "edge" => Some(Category::Edges),
            "documents" | "document" => Some(Category::Documents),
            "attachments" | "attachment" => Some(Category::Attachments),
            _ => None,
        }
    }

    /// Directory name under the storage root (always the plural spelling)
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Roots => "roots",
            Category::Nodes => "nodes",
            Category::Edges => "edges",
            Category::Documents => "documents",
            Category::Attachments => "attachments",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Category::Roots => "root",
            Category::Nodes => "node",
            Category::Edges => "edge",
            Category::Documents => "document",
            Category::Attachments => "attachment",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.dir_name())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Category::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown category '{}'", raw)))
    }
}

// =============================================================================
// Identifier grammar
// =============================================================================

/// Shape of a valid identifier: `<prefix><separator><hex suffix>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierPolicy {
    /// Single separator character between prefix and suffix
    pub separator: char,

    /// Exact number of lowercase hex characters in the suffix
    pub suffix_len: usize,

    /// Maximum length of the lowercase alphabetic prefix
    pub max_prefix_len: usize,
}

impl Default for IdentifierPolicy {
    fn default() -> Self {
        Self {
            separator: '_',
            suffix_len: 12,
            max_prefix_len: 32,
        }
    }
}

impl IdentifierPolicy {
    fn compile(&self) -> Result<Regex, regex::Error> {
        let pattern = format!(
            "^[a-z]{{1,{}}}{}[0-9a-f]{{{}}}$",
            self.max_prefix_len,
            regex::escape(&self.separator.to_string()),
            self.suffix_len
        );
        Regex::new(&pattern)
    }

    /// Human-readable explanation of why `identifier` does not match
    fn explain(&self, identifier: &str) -> String {
        let Some((prefix, suffix)) = identifier.split_once(self.separator) else {
            return format!("missing separator '{}'", self.separator);
        };
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase()) {
            return "prefix must be lowercase letters".to_string();
        }
        if prefix.len() > self.max_prefix_len {
            return format!("prefix longer than {} characters", self.max_prefix_len);
        }
        if !suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return "suffix must be lowercase hexadecimal".to_string();
        }
        if suffix.len() != self.suffix_len {
            return format!(
                "suffix must be exactly {} characters, got {}",
                self.suffix_len,
                suffix.len()
            );
        }
        "does not match identifier grammar".to_string()
    }
}

// =============================================================================
// Resolved paths
// =============================================================================

/// Canonical absolute path that is known to live under the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    category: Category,
    identifier: String,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the target currently exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl Serialize for ResolvedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path.to_string_lossy())
    }
}

// =============================================================================
// PathGuard
// =============================================================================

/// Resolves (category, identifier) requests against a single storage root
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonicalized storage root
    root: PathBuf,
    extension: Option<String>,
    categories: Vec<Category>,
    policy: IdentifierPolicy,
    grammar: Regex,
}

impl PathGuard {
    /// Create a guard for `root`
    ///
    /// The root must exist; it is canonicalized here so later containment
    /// checks compare canonical forms on both sides.
    pub fn new(
        root: &Path,
        extension: Option<String>,
        categories: Vec<Category>,
        policy: IdentifierPolicy,
    ) -> Result<Self, PathError> {
        let canonical = root.canonicalize().map_err(|e| PathError::Io {
            root: root.display().to_string(),
            source: e,
        })?;
        if !canonical.is_dir() {
            return Err(PathError::Io {
                root: root.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let grammar = policy.compile().map_err(|e| PathError::Io {
            root: root.display().to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;

        let categories = if categories.is_empty() {
            Category::ALL.to_vec()
        } else {
            categories
        };

        debug!("Path guard rooted at {}", canonical.display());

        Ok(Self {
            root: canonical,
            extension: extension.filter(|e| !e.is_empty()),
            categories,
            policy,
            grammar,
        })
    }

    /// Guard with default grammar, `.json` files and every category enabled
    pub fn with_defaults(root: &Path) -> Result<Self, PathError> {
        Self::new(
            root,
            Some("json".to_string()),
            Vec::new(),
            IdentifierPolicy::default(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Check a category against the whitelist without touching the filesystem
    pub fn check_category(&self, category: &str) -> Result<Category, PathError> {
        Category::parse(category)
            .filter(|c| self.categories.contains(c))
            .ok_or_else(|| PathError::InvalidCategory {
                category: category.to_string(),
            })
    }

    /// Check an identifier against the grammar without touching the filesystem
    pub fn check_identifier(&self, identifier: &str) -> Result<(), PathError> {
        if self.grammar.is_match(identifier) {
            Ok(())
        } else {
            Err(PathError::InvalidIdentifier {
                identifier: identifier.to_string(),
                reason: self.policy.explain(identifier),
            })
        }
    }

    /// Resolve a path request into a canonical path under the root
    pub fn resolve(&self, category: &str, identifier: &str) -> Result<ResolvedPath, PathError> {
        let category = self.check_category(category)?;
        self.check_identifier(identifier)?;

        let file_name = match &self.extension {
            Some(ext) => format!("{}.{}", identifier, ext),
            None => identifier.to_string(),
        };
        let candidate = self.root.join(category.dir_name()).join(file_name);

        let canonical = canonicalize_lenient(&candidate).map_err(|e| {
            warn!("Refusing unresolvable path {}: {}", candidate.display(), e);
            PathError::PathTraversal {
                path: candidate.display().to_string(),
            }
        })?;

        if canonical == self.root || !canonical.starts_with(&self.root) {
            warn!(
                "Path {} canonicalized outside storage root to {}",
                candidate.display(),
                canonical.display()
            );
            return Err(PathError::PathTraversal {
                path: canonical.display().to_string(),
            });
        }

        Ok(ResolvedPath {
            path: canonical,
            category,
            identifier: identifier.to_string(),
        })
    }
}

/// Canonicalize `path`, tolerating a missing tail
///
/// The nearest existing ancestor is canonicalized and the missing components
/// are appended verbatim. A component that exists only as a symlink (dangling
/// link) is an error: creating through it would follow the link.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(mut canonical) => {
                for component in missing.iter().rev() {
                    canonical.push(component);
                }
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("dangling symlink at {}", existing.display()),
                    ));
                }
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(e);
                };
                missing.push(name);
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
