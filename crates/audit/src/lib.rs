//! Audit pipeline: policy-checked recording of every tool invocation and
//! session lifecycle transition.
//!
//! The [`hooks::AuditHookFactory`] binds to a session and feeds events into
//! the [`service::AuditService`], which owns per-session JSON logs with an
//! LRU cache, bounded retention, and running aggregate statistics. Disk
//! failures are logged and never propagated — the hook pipeline must not
//! kill the agent.

pub mod hooks;
pub mod policy;
pub mod redact;
pub mod sanitize;
pub mod service;

pub use hooks::AuditHookFactory;
pub use policy::DangerPolicy;
pub use redact::Redactor;
pub use service::{AuditService, AuditSessionInfo, ResolutionFields};
