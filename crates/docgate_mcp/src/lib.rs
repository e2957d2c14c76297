//! JSON-RPC front end for the docgate admission gate
//!
//! ```text
//! client ──JSON-RPC over stdio──▶ GateServer ──ToolCall──▶ Gate ──▶ ToolHandler
//!                                     ▲                      │
//!                                     └──── result / Denial ─┘
//! ```
//!
//! `tools/list` advertises the configured tool schemas; `tools/call` results
//! carry either the handler's JSON output or the structured denial with
//! `isError: true`.

pub mod protocol;
pub mod schema;
pub mod server;

// Re-exports for convenience
pub use protocol::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use server::{GateServer, GateServerConfig};
