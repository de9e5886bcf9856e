//! Seam to the upstream agent SDK.
//!
//! The orchestrator talks to the LLM provider exclusively through the
//! [`AgentConnector`] / [`AgentClient`] traits defined here: one `query`
//! per turn, then a typed message stream from `receive_response`. Hook and
//! permission surfaces mirror what the SDK offers so the audit pipeline can
//! bind to tool invocations without knowing the wire protocol.

pub mod hooks;
pub mod permission;
pub mod types;

pub use hooks::{AgentHooks, HookDecision, HookSet, StopPayload, ToolHookPayload};
pub use permission::{resolve_path, PathPolicy, PermissionDecision, PermissionHandler};
pub use types::{AgentClient, AgentConnector, AgentMessage, AgentOptions, ContentBlock, Usage};
