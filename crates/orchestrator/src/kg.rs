//! Knowledge-graph resolution event recording.
//!
//! The extraction and merge algorithms are external collaborators; the
//! core's responsibility is the durable audit trail of what they did.
//! Recording is gated by `kg.entity_resolution_enabled`.

use std::sync::Arc;

use va_audit::{AuditService, ResolutionFields};
use va_domain::audit::AuditEventType;

pub struct KnowledgeGraphService {
    audit: Arc<AuditService>,
    enabled: bool,
}

impl KnowledgeGraphService {
    pub fn new(audit: Arc<AuditService>, enabled: bool) -> Self {
        Self { audit, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn record_scan_start(&self, session_id: &str, project_id: &str) {
        if !self.enabled {
            return;
        }
        self.audit
            .log_resolution_event(
                AuditEventType::ResolutionScanStart,
                session_id,
                project_id,
                ResolutionFields::default(),
            )
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_scan_complete(
        &self,
        session_id: &str,
        project_id: &str,
        candidates_found: u64,
        auto_merged_count: u64,
        queued_for_review_count: u64,
        scan_duration_ms: f64,
    ) {
        if !self.enabled {
            return;
        }
        self.audit
            .log_resolution_event(
                AuditEventType::ResolutionScanComplete,
                session_id,
                project_id,
                ResolutionFields {
                    candidates_found: Some(candidates_found),
                    auto_merged_count: Some(auto_merged_count),
                    queued_for_review_count: Some(queued_for_review_count),
                    scan_duration_ms: Some(scan_duration_ms),
                    ..Default::default()
                },
            )
            .await;
    }

    pub async fn record_entity_merge(
        &self,
        session_id: &str,
        project_id: &str,
        survivor_id: &str,
        merged_id: &str,
        confidence: f64,
        merge_type: &str,
    ) {
        if !self.enabled {
            return;
        }
        self.audit
            .log_resolution_event(
                AuditEventType::EntityMerge,
                session_id,
                project_id,
                ResolutionFields {
                    survivor_id: Some(survivor_id.to_owned()),
                    merged_id: Some(merged_id.to_owned()),
                    confidence: Some(confidence),
                    merge_type: Some(merge_type.to_owned()),
                    ..Default::default()
                },
            )
            .await;
    }

    pub async fn record_merge_rejected(
        &self,
        session_id: &str,
        project_id: &str,
        survivor_id: &str,
        merged_id: &str,
    ) {
        if !self.enabled {
            return;
        }
        self.audit
            .log_resolution_event(
                AuditEventType::MergeRejected,
                session_id,
                project_id,
                ResolutionFields {
                    survivor_id: Some(survivor_id.to_owned()),
                    merged_id: Some(merged_id.to_owned()),
                    ..Default::default()
                },
            )
            .await;
    }
}
