//! Audit event model.
//!
//! Hook events flow:
//!     PreToolUse   → log intent, can block dangerous operations
//!     PostToolUse  → log results and timing
//!     Stop         → log session termination
//!     SubagentStop → log subagent completions
//! plus entity-resolution events recorded by the knowledge-graph layer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Types of audit events captured by hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Tool usage
    PreToolUse,
    PostToolUse,
    ToolBlocked,

    // Session lifecycle
    SessionStop,
    SubagentStop,

    // Entity resolution
    ResolutionScanStart,
    ResolutionScanComplete,
    EntityMerge,
    MergeRejected,
}

impl AuditEventType {
    /// Wire name (snake_case), for filtering query parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::ToolBlocked => "tool_blocked",
            Self::SessionStop => "session_stop",
            Self::SubagentStop => "subagent_stop",
            Self::ResolutionScanStart => "resolution_scan_start",
            Self::ResolutionScanComplete => "resolution_scan_complete",
            Self::EntityMerge => "entity_merge",
            Self::MergeRejected => "merge_rejected",
        }
    }
}

fn event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Unix timestamp in fractional seconds, assigned at log time.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Audit event for tool usage (PreToolUse / PostToolUse / blocked).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub session_id: String,
    pub timestamp: f64,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ToolAuditEvent {
    pub fn new(
        event_type: AuditEventType,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Value,
    ) -> Self {
        Self {
            id: event_id(),
            event_type,
            session_id: session_id.into(),
            timestamp: now_ts(),
            tool_name: tool_name.into(),
            tool_input,
            tool_response: None,
            blocked: false,
            block_reason: None,
            duration_ms: None,
            success: None,
        }
    }
}

/// Audit event for session lifecycle (Stop / SubagentStop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub session_id: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl SessionAuditEvent {
    pub fn new(event_type: AuditEventType, session_id: impl Into<String>) -> Self {
        Self {
            id: event_id(),
            event_type,
            session_id: session_id.into(),
            timestamp: now_ts(),
            subagent_id: None,
            stop_reason: None,
        }
    }
}

/// Audit event for entity-resolution operations in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub session_id: String,
    pub timestamp: f64,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_found: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_merged_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_for_review_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survivor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_type: Option<String>,
}

impl ResolutionAuditEvent {
    pub fn new(
        event_type: AuditEventType,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: event_id(),
            event_type,
            session_id: session_id.into(),
            timestamp: now_ts(),
            project_id: project_id.into(),
            candidates_found: None,
            auto_merged_count: None,
            queued_for_review_count: None,
            scan_duration_ms: None,
            survivor_id: None,
            merged_id: None,
            confidence: None,
            merge_type: None,
        }
    }
}

/// Any audit event. Untagged: the variants are distinguished by their
/// required fields (`tool_name`, `project_id`); the session variant, whose
/// extra fields are all optional, must stay last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditEvent {
    Tool(ToolAuditEvent),
    Resolution(ResolutionAuditEvent),
    Session(SessionAuditEvent),
}

impl AuditEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Tool(e) => &e.session_id,
            Self::Resolution(e) => &e.session_id,
            Self::Session(e) => &e.session_id,
        }
    }

    pub fn event_type(&self) -> AuditEventType {
        match self {
            Self::Tool(e) => e.event_type,
            Self::Resolution(e) => e.event_type,
            Self::Session(e) => e.event_type,
        }
    }
}

impl From<ToolAuditEvent> for AuditEvent {
    fn from(e: ToolAuditEvent) -> Self {
        Self::Tool(e)
    }
}

impl From<SessionAuditEvent> for AuditEvent {
    fn from(e: SessionAuditEvent) -> Self {
        Self::Session(e)
    }
}

impl From<ResolutionAuditEvent> for AuditEvent {
    fn from(e: ResolutionAuditEvent) -> Self {
        Self::Resolution(e)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log entries & responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single audit log row with denormalized fields for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub event_type: AuditEventType,
    pub session_id: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub summary: String,
}

impl AuditLogEntry {
    pub fn from_event(event: &AuditEvent) -> Self {
        match event {
            AuditEvent::Tool(e) => Self::from_tool_event(e),
            AuditEvent::Session(e) => Self::from_session_event(e),
            AuditEvent::Resolution(e) => Self::from_resolution_event(e),
        }
    }

    fn from_tool_event(event: &ToolAuditEvent) -> Self {
        let summary = if event.blocked {
            format!(
                "Blocked: {}",
                event.block_reason.as_deref().unwrap_or("unknown reason")
            )
        } else if event.event_type == AuditEventType::PostToolUse {
            let status = if event.success.unwrap_or(false) {
                "success"
            } else {
                "failed"
            };
            match event.duration_ms {
                Some(ms) => format!("{} {status} ({ms:.0}ms)", event.tool_name),
                None => format!("{} {status}", event.tool_name),
            }
        } else {
            format!("Invoking {}", event.tool_name)
        };

        Self {
            id: event.id.clone(),
            event_type: event.event_type,
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            tool_name: Some(event.tool_name.clone()),
            blocked: event.blocked,
            success: event.success,
            duration_ms: event.duration_ms,
            summary,
        }
    }

    fn from_session_event(event: &SessionAuditEvent) -> Self {
        let summary = if event.event_type == AuditEventType::SubagentStop {
            format!(
                "Subagent {} stopped",
                event.subagent_id.as_deref().unwrap_or("unknown")
            )
        } else {
            format!(
                "Session stopped: {}",
                event.stop_reason.as_deref().unwrap_or("completed")
            )
        };

        Self {
            id: event.id.clone(),
            event_type: event.event_type,
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            tool_name: None,
            blocked: false,
            success: None,
            duration_ms: None,
            summary,
        }
    }

    fn from_resolution_event(event: &ResolutionAuditEvent) -> Self {
        let summary = match event.event_type {
            AuditEventType::ResolutionScanStart => {
                format!("Resolution scan started for project {}", event.project_id)
            }
            AuditEventType::ResolutionScanComplete => {
                let duration = event
                    .scan_duration_ms
                    .map(|ms| format!(" ({ms:.0}ms)"))
                    .unwrap_or_default();
                format!(
                    "Resolution scan complete: {} candidates{duration}",
                    event.candidates_found.unwrap_or(0)
                )
            }
            AuditEventType::EntityMerge => {
                let conf = event
                    .confidence
                    .filter(|c| *c != 0.0)
                    .map(|c| format!(" ({:.0}%)", c * 100.0))
                    .unwrap_or_default();
                format!(
                    "Entity merge ({}): {} -> {}{conf}",
                    event.merge_type.as_deref().unwrap_or("auto"),
                    event.merged_id.as_deref().unwrap_or("?"),
                    event.survivor_id.as_deref().unwrap_or("?"),
                )
            }
            AuditEventType::MergeRejected => format!(
                "Merge rejected: {} and {}",
                event.merged_id.as_deref().unwrap_or("?"),
                event.survivor_id.as_deref().unwrap_or("?"),
            ),
            other => format!("Resolution event: {}", other.as_str()),
        };

        Self {
            id: event.id.clone(),
            event_type: event.event_type,
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            tool_name: None,
            blocked: false,
            success: None,
            duration_ms: event.scan_duration_ms,
            summary,
        }
    }
}

/// Paginated audit log response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLogResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub entries: Vec<AuditLogEntry>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub has_more: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregate stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate statistics for audit events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub tools_invoked: u64,
    #[serde(default)]
    pub tools_blocked: u64,
    #[serde(default)]
    pub tools_succeeded: u64,
    #[serde(default)]
    pub tools_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_tool_duration_ms: Option<f64>,

    #[serde(default)]
    pub sessions_stopped: u64,
    #[serde(default)]
    pub subagents_stopped: u64,

    #[serde(default)]
    pub resolution_scans: u64,
    #[serde(default)]
    pub entities_merged: u64,
    #[serde(default)]
    pub merges_rejected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_scan_duration_ms: Option<f64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
