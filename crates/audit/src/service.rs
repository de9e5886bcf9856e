//! Audit event storage and aggregate statistics.
//!
//! Layout:
//!
//! ```text
//! data/audit/
//!   sessions/<session_id>.json   # per-session audit logs (0o640)
//!   global_stats.json            # aggregate statistics
//! ```
//!
//! Hot sessions are served from a bounded LRU cache; disk remains the
//! source of truth. All disk writes run off the async path and a disk
//! failure is logged, never propagated to the hook caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use va_domain::audit::{
    AuditEvent, AuditEventType, AuditLogEntry, AuditLogResponse, AuditStats,
    ResolutionAuditEvent,
};
use va_domain::config::AuditConfig;
use va_domain::error::Result;
use va_storage::atomic::{atomic_write_json, atomic_write_json_with_mode, read_json};

/// Owner rw, group r. Audit logs can contain tool inputs.
const AUDIT_FILE_MODE: u32 = 0o640;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session log file shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionLogFile {
    session_id: String,
    event_count: usize,
    events: Vec<AuditEvent>,
}

/// Row for `list_sessions_with_audits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSessionInfo {
    pub session_id: String,
    pub event_count: usize,
    /// File mtime as unix seconds.
    pub last_modified: f64,
}

/// Flattened optional fields for resolution events.
#[derive(Debug, Clone, Default)]
pub struct ResolutionFields {
    pub candidates_found: Option<u64>,
    pub auto_merged_count: Option<u64>,
    pub queued_for_review_count: Option<u64>,
    pub scan_duration_ms: Option<f64>,
    pub survivor_id: Option<String>,
    pub merged_id: Option<String>,
    pub confidence: Option<f64>,
    pub merge_type: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LRU cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheSlot {
    events: Vec<AuditEvent>,
    tick: u64,
}

/// Bounded per-session event cache with least-recently-used eviction,
/// tracked by a monotonic use tick.
struct LruCache {
    max_sessions: usize,
    next_tick: u64,
    slots: HashMap<String, CacheSlot>,
}

impl LruCache {
    fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            next_tick: 0,
            slots: HashMap::new(),
        }
    }

    fn touch(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn contains(&self, session_id: &str) -> bool {
        self.slots.contains_key(session_id)
    }

    fn get_mut(&mut self, session_id: &str) -> Option<&mut Vec<AuditEvent>> {
        let tick = self.touch();
        let slot = self.slots.get_mut(session_id)?;
        slot.tick = tick;
        Some(&mut slot.events)
    }

    fn snapshot(&mut self, session_id: &str) -> Option<Vec<AuditEvent>> {
        self.get_mut(session_id).map(|events| events.clone())
    }

    fn insert(&mut self, session_id: String, events: Vec<AuditEvent>) {
        if !self.slots.contains_key(&session_id) && self.slots.len() >= self.max_sessions {
            self.evict_lru();
        }
        let tick = self.touch();
        self.slots.insert(session_id, CacheSlot { events, tick });
    }

    fn remove(&mut self, session_id: &str) {
        self.slots.remove(session_id);
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.tick)
            .map(|(id, _)| id.clone())
        {
            self.slots.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StatsState {
    stats: AuditStats,
    dirty: bool,
    /// Count of post-tool events that actually carried a duration. The
    /// running average divides by this, not the total event count,
    /// otherwise duration-less events drag the average toward zero.
    tool_duration_count: u64,
    scan_duration_count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Service for storing and querying agent audit events.
pub struct AuditService {
    sessions_path: PathBuf,
    stats_path: PathBuf,
    retention_hours: u64,
    max_events_per_session: usize,
    cache: Mutex<LruCache>,
    stats: Mutex<StatsState>,
    /// Serializes session-file writes so the newest cache state always
    /// lands on disk last.
    io_lock: tokio::sync::Mutex<()>,
}

impl AuditService {
    pub fn new(data_path: &Path, config: &AuditConfig) -> Result<Self> {
        let audit_path = data_path.join("audit");
        let sessions_path = audit_path.join("sessions");
        std::fs::create_dir_all(&sessions_path)?;
        let stats_path = audit_path.join("global_stats.json");

        let stats = match read_json::<AuditStats>(&stats_path) {
            Ok(Some(stats)) => stats,
            Ok(None) => AuditStats::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load audit stats, starting fresh");
                AuditStats::default()
            }
        };

        Ok(Self {
            sessions_path,
            stats_path,
            retention_hours: config.retention_hours,
            max_events_per_session: config.max_events_per_session.max(2),
            cache: Mutex::new(LruCache::new(config.cache_max_sessions)),
            stats: Mutex::new(StatsState {
                stats,
                dirty: false,
                tool_duration_count: 0,
                scan_duration_count: 0,
            }),
            io_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_path.join(format!("{session_id}.json"))
    }

    // ── logging ─────────────────────────────────────────────────────

    /// Log an audit event: append to the session's event list in cache and
    /// on disk, prune to the per-session cap, and update aggregate stats.
    pub async fn log_event(&self, event: impl Into<AuditEvent>) {
        let event = event.into();
        let session_id = event.session_id().to_owned();

        self.ensure_cached(&session_id).await;

        {
            let mut cache = self.cache.lock();
            // Evicted between ensure and here: start from empty, the
            // persisted file still has the history.
            if !cache.contains(&session_id) {
                cache.insert(session_id.clone(), Vec::new());
            }
            if let Some(events) = cache.get_mut(&session_id) {
                // At capacity: keep the newest N-1, then append, so the
                // post-append length is exactly the cap.
                if events.len() >= self.max_events_per_session {
                    let keep_from = events.len() - (self.max_events_per_session - 1);
                    events.drain(..keep_from);
                    tracing::warn!(session_id = %session_id, "audit log at cap, pruning old events");
                }
                events.push(event.clone());
            }
        }

        self.persist_session(&session_id).await;
        self.update_stats(&event);

        tracing::debug!(
            session_id = %session_id,
            event_type = event.event_type().as_str(),
            "logged audit event"
        );
    }

    /// Thin wrapper for resolution events with flattened arguments.
    pub async fn log_resolution_event(
        &self,
        event_type: AuditEventType,
        session_id: &str,
        project_id: &str,
        fields: ResolutionFields,
    ) {
        let mut event = ResolutionAuditEvent::new(event_type, session_id, project_id);
        event.candidates_found = fields.candidates_found;
        event.auto_merged_count = fields.auto_merged_count;
        event.queued_for_review_count = fields.queued_for_review_count;
        event.scan_duration_ms = fields.scan_duration_ms;
        event.survivor_id = fields.survivor_id;
        event.merged_id = fields.merged_id;
        event.confidence = fields.confidence;
        event.merge_type = fields.merge_type;
        self.log_event(event).await;
    }

    /// Make sure the session's events are in the cache, loading from disk
    /// on a miss. The cache lock is never held across disk I/O.
    async fn ensure_cached(&self, session_id: &str) {
        if self.cache.lock().contains(session_id) {
            return;
        }

        let path = self.session_path(session_id);
        let loaded = tokio::task::spawn_blocking(move || read_json::<SessionLogFile>(&path))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "audit load task panicked");
                Ok(None)
            });

        let events = match loaded {
            Ok(Some(file)) => file.events,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to load audit log");
                Vec::new()
            }
        };

        let mut cache = self.cache.lock();
        if !cache.contains(session_id) {
            cache.insert(session_id.to_owned(), events);
        }
    }

    /// Write the session's current cached events to disk. Serialized so the
    /// newest state always wins; failures are logged and swallowed.
    async fn persist_session(&self, session_id: &str) {
        let _io = self.io_lock.lock().await;

        let Some(events) = self.cache.lock().snapshot(session_id) else {
            return;
        };
        let file = SessionLogFile {
            session_id: session_id.to_owned(),
            event_count: events.len(),
            events,
        };
        let path = self.session_path(session_id);

        let result = tokio::task::spawn_blocking(move || {
            atomic_write_json_with_mode(&path, &file, AUDIT_FILE_MODE)
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(session_id, error = %e, "failed to save audit log");
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "audit save task panicked");
            }
        }
    }

    // ── stats ───────────────────────────────────────────────────────

    fn update_stats(&self, event: &AuditEvent) {
        let mut state = self.stats.lock();
        state.stats.total_events += 1;
        state.dirty = true;

        match event {
            AuditEvent::Tool(e) => match e.event_type {
                AuditEventType::PreToolUse => state.stats.tools_invoked += 1,
                AuditEventType::ToolBlocked => state.stats.tools_blocked += 1,
                AuditEventType::PostToolUse => {
                    match e.success {
                        Some(true) => state.stats.tools_succeeded += 1,
                        Some(false) => state.stats.tools_failed += 1,
                        None => {}
                    }
                    if let Some(duration) = e.duration_ms {
                        state.tool_duration_count += 1;
                        let n = state.tool_duration_count as f64;
                        let avg = state.stats.avg_tool_duration_ms.unwrap_or(0.0);
                        state.stats.avg_tool_duration_ms = Some(avg + (duration - avg) / n);
                    }
                }
                _ => {}
            },
            AuditEvent::Session(e) => match e.event_type {
                AuditEventType::SessionStop => state.stats.sessions_stopped += 1,
                AuditEventType::SubagentStop => state.stats.subagents_stopped += 1,
                _ => {}
            },
            AuditEvent::Resolution(e) => match e.event_type {
                AuditEventType::ResolutionScanComplete => {
                    state.stats.resolution_scans += 1;
                    if let Some(duration) = e.scan_duration_ms {
                        state.scan_duration_count += 1;
                        let n = state.scan_duration_count as f64;
                        let avg = state.stats.avg_scan_duration_ms.unwrap_or(0.0);
                        state.stats.avg_scan_duration_ms = Some(avg + (duration - avg) / n);
                    }
                }
                AuditEventType::EntityMerge => state.stats.entities_merged += 1,
                AuditEventType::MergeRejected => state.stats.merges_rejected += 1,
                _ => {}
            },
        }
    }

    /// Aggregate statistics; flushes dirty stats to disk first.
    pub async fn get_stats(&self) -> AuditStats {
        let (snapshot, dirty) = {
            let mut state = self.stats.lock();
            let dirty = state.dirty;
            state.dirty = false;
            (state.stats.clone(), dirty)
        };

        if dirty {
            let path = self.stats_path.clone();
            let stats = snapshot.clone();
            let result =
                tokio::task::spawn_blocking(move || atomic_write_json(&path, &stats)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "failed to save audit stats");
                }
                Err(e) => {
                    tracing::error!(error = %e, "stats save task panicked");
                }
            }
        }

        snapshot
    }

    // ── queries ─────────────────────────────────────────────────────

    /// Paginated audit log for a session, newest first, optionally
    /// filtered by event type.
    pub async fn get_session_audit_log(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
        event_type: Option<&str>,
    ) -> AuditLogResponse {
        self.ensure_cached(session_id).await;
        let events = self
            .cache
            .lock()
            .snapshot(session_id)
            .unwrap_or_default();

        let filtered: Vec<&AuditEvent> = events
            .iter()
            .filter(|e| match event_type {
                Some(wanted) => e.event_type().as_str() == wanted,
                None => true,
            })
            .collect();
        let total_count = filtered.len();

        let entries: Vec<AuditLogEntry> = filtered
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|e| AuditLogEntry::from_event(e))
            .collect();

        AuditLogResponse {
            session_id: Some(session_id.to_owned()),
            entries,
            total_count,
            has_more: offset + limit < total_count,
        }
    }

    /// Sessions that have audit logs on disk, most recently modified first.
    pub async fn list_sessions_with_audits(&self, limit: usize) -> Vec<AuditSessionInfo> {
        let sessions_path = self.sessions_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut rows: Vec<(SystemTime, PathBuf)> = Vec::new();
            let entries = match std::fs::read_dir(&sessions_path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(error = %e, "failed to list audit sessions");
                    return Vec::new();
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                rows.push((modified, path));
            }
            rows.sort_by(|a, b| b.0.cmp(&a.0));

            rows.into_iter()
                .take(limit)
                .filter_map(|(modified, path)| {
                    let session_id = path.file_stem()?.to_string_lossy().into_owned();
                    let file = read_json::<SessionLogFile>(&path).ok().flatten()?;
                    let last_modified = modified
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs_f64();
                    Some(AuditSessionInfo {
                        session_id,
                        event_count: file.event_count,
                        last_modified,
                    })
                })
                .collect()
        })
        .await;

        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "audit list task panicked");
            Vec::new()
        })
    }

    // ── retention ───────────────────────────────────────────────────

    /// Delete per-session logs older than the retention window and evict
    /// them from the cache. Returns how many sessions were cleaned up.
    pub async fn cleanup_old_logs(&self) -> usize {
        let cutoff = SystemTime::now() - Duration::from_secs(self.retention_hours * 3600);
        let sessions_path = self.sessions_path.clone();

        let removed: Vec<String> = tokio::task::spawn_blocking(move || {
            let mut removed = Vec::new();
            let entries = match std::fs::read_dir(&sessions_path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(error = %e, "audit cleanup scan failed");
                    return removed;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                if modified < cutoff {
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::error!(path = %path.display(), error = %e, "cleanup failed");
                        continue;
                    }
                    if let Some(stem) = path.file_stem() {
                        removed.push(stem.to_string_lossy().into_owned());
                    }
                }
            }
            removed
        })
        .await
        .unwrap_or_default();

        {
            let mut cache = self.cache.lock();
            for session_id in &removed {
                cache.remove(session_id);
            }
        }

        if !removed.is_empty() {
            tracing::info!(cleaned = removed.len(), "cleaned up old audit logs");
        }
        removed.len()
    }

    #[cfg(test)]
    fn cached_sessions(&self) -> usize {
        self.cache.lock().len()
    }

    #[cfg(test)]
    fn is_cached(&self, session_id: &str) -> bool {
        self.cache.lock().contains(session_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use va_domain::audit::{SessionAuditEvent, ToolAuditEvent};

    fn config() -> AuditConfig {
        AuditConfig::default()
    }

    fn service_with(dir: &Path, config: AuditConfig) -> AuditService {
        AuditService::new(dir, &config).unwrap()
    }

    fn post_event(session_id: &str, duration_ms: Option<f64>, success: bool) -> ToolAuditEvent {
        let mut e = ToolAuditEvent::new(AuditEventType::PostToolUse, session_id, "Bash", json!({}));
        e.duration_ms = duration_ms;
        e.success = Some(success);
        e
    }

    // ── logging & pagination ────────────────────────────────────────

    #[tokio::test]
    async fn log_event_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_event(ToolAuditEvent::new(
                AuditEventType::PreToolUse,
                "s1",
                "Bash",
                json!({"command": "ls"}),
            ))
            .await;

        let file: SessionLogFile =
            read_json(&dir.path().join("audit/sessions/s1.json")).unwrap().unwrap();
        assert_eq!(file.event_count, 1);
        assert_eq!(file.session_id, "s1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_files_have_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s1"))
            .await;

        let mode = std::fs::metadata(dir.path().join("audit/sessions/s1.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn pagination_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        for i in 0..10 {
            let mut e =
                ToolAuditEvent::new(AuditEventType::PostToolUse, "paginated", "Bash", json!({}));
            e.duration_ms = Some(i as f64);
            e.success = Some(true);
            service.log_event(e).await;
        }

        let page = service
            .get_session_audit_log("paginated", 3, 0, None)
            .await;
        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.total_count, 10);
        assert!(page.has_more);
        // Newest (last logged) first.
        assert_eq!(page.entries[0].duration_ms, Some(9.0));

        let tail = service
            .get_session_audit_log("paginated", 3, 9, None)
            .await;
        assert_eq!(tail.entries.len(), 1);
        assert!(!tail.has_more);
        assert_eq!(tail.total_count, 10);
    }

    #[tokio::test]
    async fn pagination_filter_by_event_type() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_event(ToolAuditEvent::new(
                AuditEventType::PreToolUse,
                "s1",
                "Bash",
                json!({}),
            ))
            .await;
        service.log_event(post_event("s1", Some(5.0), true)).await;
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s1"))
            .await;

        let page = service
            .get_session_audit_log("s1", 10, 0, Some("post_tool_use"))
            .await;
        assert_eq!(page.total_count, 1);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].event_type, AuditEventType::PostToolUse);
    }

    #[tokio::test]
    async fn unknown_session_is_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());
        let page = service.get_session_audit_log("ghost", 10, 0, None).await;
        assert_eq!(page.total_count, 0);
        assert!(page.entries.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn events_survive_cache_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.cache_max_sessions = 1;
        let service = service_with(dir.path(), cfg);

        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s1"))
            .await;
        // Logging a second session evicts s1 from the 1-slot cache.
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s2"))
            .await;
        assert_eq!(service.cached_sessions(), 1);
        assert!(!service.is_cached("s1"));

        // Disk is the source of truth: s1 reloads with its history.
        let page = service.get_session_audit_log("s1", 10, 0, None).await;
        assert_eq!(page.total_count, 1);
    }

    // ── per-session cap ─────────────────────────────────────────────

    #[tokio::test]
    async fn event_cap_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.max_events_per_session = 5;
        let service = service_with(dir.path(), cfg);

        for i in 0..8 {
            let mut e = ToolAuditEvent::new(AuditEventType::PostToolUse, "s1", "Bash", json!({}));
            e.duration_ms = Some(i as f64);
            e.success = Some(true);
            service.log_event(e).await;
        }

        let page = service.get_session_audit_log("s1", 100, 0, None).await;
        // Post-append length is exactly the cap.
        assert_eq!(page.total_count, 5);
        // Oldest events were pruned: newest-first page starts at 7, ends at 3.
        assert_eq!(page.entries.first().unwrap().duration_ms, Some(7.0));
        assert_eq!(page.entries.last().unwrap().duration_ms, Some(3.0));
    }

    // ── stats ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn stats_counters() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_event(ToolAuditEvent::new(
                AuditEventType::PreToolUse,
                "s1",
                "Bash",
                json!({}),
            ))
            .await;
        service.log_event(post_event("s1", Some(10.0), true)).await;
        service.log_event(post_event("s1", None, false)).await;

        let mut blocked =
            ToolAuditEvent::new(AuditEventType::ToolBlocked, "s1", "Bash", json!({}));
        blocked.blocked = true;
        service.log_event(blocked).await;

        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s1"))
            .await;

        let stats = service.get_stats().await;
        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.tools_invoked, 1);
        assert_eq!(stats.tools_succeeded, 1);
        assert_eq!(stats.tools_failed, 1);
        assert_eq!(stats.tools_blocked, 1);
        assert_eq!(stats.sessions_stopped, 1);
    }

    #[tokio::test]
    async fn running_average_ignores_missing_durations() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        // Durations 10, 20, 30 with duration-less events interleaved.
        service.log_event(post_event("s1", Some(10.0), true)).await;
        service.log_event(post_event("s1", None, true)).await;
        service.log_event(post_event("s1", Some(20.0), true)).await;
        service.log_event(post_event("s1", None, true)).await;
        service.log_event(post_event("s1", Some(30.0), true)).await;

        let stats = service.get_stats().await;
        let avg = stats.avg_tool_duration_ms.unwrap();
        assert!((avg - 20.0).abs() < 1e-9, "avg was {avg}");
    }

    #[tokio::test]
    async fn scan_average_over_scan_complete_events() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_resolution_event(
                AuditEventType::ResolutionScanStart,
                "s1",
                "p1",
                ResolutionFields::default(),
            )
            .await;
        service
            .log_resolution_event(
                AuditEventType::ResolutionScanComplete,
                "s1",
                "p1",
                ResolutionFields {
                    candidates_found: Some(3),
                    scan_duration_ms: Some(100.0),
                    ..Default::default()
                },
            )
            .await;
        service
            .log_resolution_event(
                AuditEventType::ResolutionScanComplete,
                "s1",
                "p1",
                ResolutionFields {
                    scan_duration_ms: Some(300.0),
                    ..Default::default()
                },
            )
            .await;

        let stats = service.get_stats().await;
        assert_eq!(stats.resolution_scans, 2);
        let avg = stats.avg_scan_duration_ms.unwrap();
        assert!((avg - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stats_persist_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let service = service_with(dir.path(), config());
            service.log_event(post_event("s1", Some(10.0), true)).await;
            service.get_stats().await; // flush
        }

        let service = service_with(dir.path(), config());
        let stats = service.get_stats().await;
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.tools_succeeded, 1);
    }

    // ── listing & cleanup ───────────────────────────────────────────

    #[tokio::test]
    async fn list_sessions_with_audits_sorted_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "older"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "newer"))
            .await;

        let sessions = service.list_sessions_with_audits(10).await;
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "newer");
        assert_eq!(sessions[0].event_count, 1);
        assert_eq!(sessions[1].session_id, "older");

        let limited = service.list_sessions_with_audits(1).await;
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_removes_stale_logs_and_cache_entries() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());

        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "stale"))
            .await;
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "fresh"))
            .await;

        // Backdate the stale session's file beyond the retention window.
        let stale_path = dir.path().join("audit/sessions/stale.json");
        let old = SystemTime::now() - Duration::from_secs(200 * 3600);
        let file = std::fs::File::options()
            .write(true)
            .open(&stale_path)
            .unwrap();
        file.set_times(std::fs::FileTimes::new().set_modified(old))
            .unwrap();

        let cleaned = service.cleanup_old_logs().await;
        assert_eq!(cleaned, 1);
        assert!(!stale_path.exists());
        assert!(!service.is_cached("stale"));
        assert!(service.is_cached("fresh"));
    }

    #[tokio::test]
    async fn cleanup_noop_when_all_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), config());
        service
            .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "s1"))
            .await;
        assert_eq!(service.cleanup_old_logs().await, 0);
    }

    // ── concurrent logging ──────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_log_events_all_retained() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service_with(dir.path(), config()));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .log_event(SessionAuditEvent::new(AuditEventType::SessionStop, "shared"))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let page = service.get_session_audit_log("shared", 100, 0, None).await;
        assert_eq!(page.total_count, 20);
        assert_eq!(service.get_stats().await.sessions_stopped, 20);
    }
}
