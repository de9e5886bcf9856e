//! Hook surface mirroring the SDK's four event families.
//!
//! Hook flow:
//!     PreToolUse   → may deny the invocation before it executes
//!     PostToolUse  → observes result and timing
//!     Stop         → session termination
//!     SubagentStop → subagent completion
//!
//! Every registered hook fires for every event; for pre-tool-use the first
//! deny decision wins.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads & decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input delivered to tool hooks.
#[derive(Debug, Clone)]
pub struct ToolHookPayload {
    pub tool_name: String,
    pub tool_input: Value,
    /// Present for post-tool-use only.
    pub tool_response: Option<Value>,
}

/// Input delivered to stop hooks.
#[derive(Debug, Clone, Default)]
pub struct StopPayload {
    pub stop_reason: Option<String>,
    pub subagent_id: Option<String>,
}

/// Decision returned from a pre-tool-use hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Proceed with the invocation.
    Continue,
    /// Refuse the invocation; the reason is reported upstream as the
    /// permission-decision reason.
    Deny { reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callbacks fired by the SDK around tool use and at stop events.
///
/// Implementations must never fail the agent: internal errors are handled
/// (logged) inside the hook.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_pre_tool_use(
        &self,
        payload: &ToolHookPayload,
        tool_use_id: Option<&str>,
    ) -> HookDecision {
        let _ = (payload, tool_use_id);
        HookDecision::Continue
    }

    async fn on_post_tool_use(&self, payload: &ToolHookPayload, tool_use_id: Option<&str>) {
        let _ = (payload, tool_use_id);
    }

    async fn on_stop(&self, payload: &StopPayload) {
        let _ = payload;
    }

    async fn on_subagent_stop(&self, payload: &StopPayload) {
        let _ = payload;
    }
}

/// The hooks registered for one conversation.
pub type HookSet = Vec<Arc<dyn AgentHooks>>;

/// Run every pre-tool-use hook in registration order; the first deny wins.
pub async fn run_pre_tool_use(
    hooks: &HookSet,
    payload: &ToolHookPayload,
    tool_use_id: Option<&str>,
) -> HookDecision {
    for hook in hooks {
        if let HookDecision::Deny { reason } = hook.on_pre_tool_use(payload, tool_use_id).await
        {
            return HookDecision::Deny { reason };
        }
    }
    HookDecision::Continue
}
