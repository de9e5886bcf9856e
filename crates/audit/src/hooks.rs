//! Session-bound audit hooks.
//!
//! The factory is created per session and registered with the agent
//! client. Pre-tool-use runs the danger policy and can deny the
//! invocation; post-tool-use records timing and the sanitized response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use va_agent::hooks::{AgentHooks, HookDecision, StopPayload, ToolHookPayload};
use va_domain::audit::{AuditEventType, SessionAuditEvent, ToolAuditEvent};

use crate::policy::DangerPolicy;
use crate::redact::Redactor;
use crate::sanitize::sanitize_value;
use crate::service::AuditService;

/// Creates hook callbacks bound to a `(session_id, audit_service)` pair.
///
/// Each session gets its own factory so tool timings and events correlate
/// to the right session without global state.
pub struct AuditHookFactory {
    session_id: String,
    audit: Arc<AuditService>,
    policy: DangerPolicy,
    redactor: Redactor,
    /// tool_use_id → invocation start, for duration tracking.
    start_times: Mutex<HashMap<String, Instant>>,
}

impl AuditHookFactory {
    pub fn new(session_id: impl Into<String>, audit: Arc<AuditService>) -> Self {
        Self {
            session_id: session_id.into(),
            audit,
            policy: DangerPolicy::new(),
            redactor: Redactor::new(),
            start_times: Mutex::new(HashMap::new()),
        }
    }

    /// Success classification: explicit `success` / `error` / `is_error`
    /// fields when present, success otherwise.
    fn determine_success(response: Option<&Value>) -> bool {
        let Some(response) = response else {
            return true;
        };
        if let Some(map) = response.as_object() {
            if let Some(success) = map.get("success").and_then(Value::as_bool) {
                return success;
            }
            if map.contains_key("error") {
                return false;
            }
            if let Some(is_error) = map.get("is_error").and_then(Value::as_bool) {
                return !is_error;
            }
        }
        true
    }
}

#[async_trait]
impl AgentHooks for AuditHookFactory {
    async fn on_pre_tool_use(
        &self,
        payload: &ToolHookPayload,
        tool_use_id: Option<&str>,
    ) -> HookDecision {
        if let Some(id) = tool_use_id {
            self.start_times.lock().insert(id.to_owned(), Instant::now());
        }

        if let Some(block_reason) = self.policy.check(&payload.tool_name, &payload.tool_input)
        {
            let mut event = ToolAuditEvent::new(
                AuditEventType::ToolBlocked,
                &self.session_id,
                &payload.tool_name,
                payload.tool_input.clone(),
            );
            event.blocked = true;
            event.block_reason = Some(block_reason.clone());
            self.audit.log_event(event).await;

            tracing::warn!(
                session_id = %self.session_id,
                tool_name = %payload.tool_name,
                reason = %block_reason,
                "blocked tool invocation"
            );

            return HookDecision::Deny {
                reason: block_reason,
            };
        }

        self.audit
            .log_event(ToolAuditEvent::new(
                AuditEventType::PreToolUse,
                &self.session_id,
                &payload.tool_name,
                payload.tool_input.clone(),
            ))
            .await;

        HookDecision::Continue
    }

    async fn on_post_tool_use(&self, payload: &ToolHookPayload, tool_use_id: Option<&str>) {
        let duration_ms = tool_use_id
            .and_then(|id| self.start_times.lock().remove(id))
            .map(|start| start.elapsed().as_secs_f64() * 1000.0);

        let success = Self::determine_success(payload.tool_response.as_ref());

        let mut event = ToolAuditEvent::new(
            AuditEventType::PostToolUse,
            &self.session_id,
            &payload.tool_name,
            payload.tool_input.clone(),
        );
        event.tool_response = payload
            .tool_response
            .as_ref()
            .map(|r| sanitize_value(r, &self.redactor));
        event.duration_ms = duration_ms;
        event.success = Some(success);
        self.audit.log_event(event).await;
    }

    async fn on_stop(&self, payload: &StopPayload) {
        let mut event = SessionAuditEvent::new(AuditEventType::SessionStop, &self.session_id);
        event.stop_reason = payload.stop_reason.clone();
        self.audit.log_event(event).await;

        tracing::info!(
            session_id = %self.session_id,
            reason = payload.stop_reason.as_deref().unwrap_or("completed"),
            "session stop"
        );
    }

    async fn on_subagent_stop(&self, payload: &StopPayload) {
        let mut event = SessionAuditEvent::new(AuditEventType::SubagentStop, &self.session_id);
        event.subagent_id = payload.subagent_id.clone();
        self.audit.log_event(event).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
