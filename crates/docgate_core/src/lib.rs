//! Admission gate for document-store tools
//!
//! Untrusted callers name a tool and pass a structured argument map. Before
//! anything reaches storage or business logic, the gate:
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//! │  RateLimiter  │──▶│InputValidators│──▶│   PathGuard   │──▶│  ToolHandler  │
//! │ sliding window│   │ per-arg checks│   │  containment  │   │  (external)   │
//! └───────┬───────┘   └───────┬───────┘   └───────┬───────┘   └───────────────┘
//!         │ deny              │ deny              │ deny
//!         ▼                   ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                  AuditLog (one chained record per call)                   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! 1. **Fail closed:** every denial is a typed `Denial`; a panicking check
//!    denies the call.
//!
//! 2. **Containment on canonical paths:** resolved paths are checked after
//!    `..` and symlink resolution.
//!
//! 3. **Strict sliding window:** no `W`-length interval admits more than `N`
//!    calls per caller, under any concurrency.
//!
//! 4. **One record per call:** allowed or denied, each evaluated call is
//!    audited exactly once; audit persistence failures never change the
//!    decision.

pub mod audit;
pub mod clock;
pub mod config;
pub mod gate;
pub mod path_guard;
pub mod rate_limit;
pub mod validators;

// Re-exports for convenience
pub use audit::{
    read_records, verify_chain, AuditEntry, AuditError, AuditLog, AuditQuery, AuditRecord,
    AuditSink, ChainBreak, FileAuditSink, MemoryAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ArgumentSpec, ConfigError, GateConfig, PathBinding, ToolSchema};
pub use gate::{
    Decision, Denial, DenialReason, Gate, GateBuilder, GateError, GateOutcome, Stage, ToolCall,
    ToolHandler, ValidatedCall,
};
pub use path_guard::{Category, IdentifierPolicy, PathError, PathGuard, ResolvedPath};
pub use rate_limit::{RateLimitSettings, RateLimiter};
pub use validators::{
    ArgumentValidator, Check, InputValidators, ReasonCode, TextFormat, ValidationFailure,
    ValidationOutcome,
};
