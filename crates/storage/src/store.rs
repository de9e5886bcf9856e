//! File-based storage manager for sessions, transcripts, and cost data.
//!
//! Layout under the base directory:
//!
//! ```text
//! data/
//!   metadata.json           # transcript index + global cost
//!   sessions/<uuid>.json    # chat history per session
//!   sessions/<uuid>_cost.json
//!   transcripts/<filename>  # raw text files referenced by metadata.json
//!   exports/<filename>      # downloadable exports, TTL-swept
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use va_domain::cost::{GlobalCost, SessionCost};
use va_domain::error::{Error, Result};

use crate::atomic::{atomic_write_json, read_json};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A session ID must parse as a UUIDv4. Checked at every boundary.
pub fn is_valid_session_id(session_id: &str) -> bool {
    matches!(
        Uuid::parse_str(session_id).map(|u| u.get_version()),
        Ok(Some(uuid::Version::Random))
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

/// One message in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Summary row for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Youtube,
    Upload,
    Local,
}

/// Metadata for a stored transcript; the text body lives on disk at
/// `file_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMeta {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub original_source: String,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "d_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

fn d_format() -> String {
    "txt".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    transcripts: HashMap<String, TranscriptMeta>,
    #[serde(default)]
    global_cost: GlobalCost,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-based storage for sessions, transcripts, and cost aggregates.
///
/// All writes are atomic (tmp + rename). `metadata.json` mutations are
/// read-modify-write cycles serialized by a single in-process mutex so two
/// concurrent updates cannot lose each other's changes.
pub struct StorageManager {
    sessions_dir: PathBuf,
    transcripts_dir: PathBuf,
    exports_dir: PathBuf,
    metadata_path: PathBuf,
    metadata_lock: Mutex<()>,
}

impl StorageManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let sessions_dir = base_dir.join("sessions");
        let transcripts_dir = base_dir.join("transcripts");
        let exports_dir = base_dir.join("exports");
        std::fs::create_dir_all(&sessions_dir)?;
        std::fs::create_dir_all(&transcripts_dir)?;
        std::fs::create_dir_all(&exports_dir)?;

        tracing::info!(path = %base_dir.display(), "storage initialized");

        Ok(Self {
            sessions_dir,
            transcripts_dir,
            exports_dir,
            metadata_path: base_dir.join("metadata.json"),
            metadata_lock: Mutex::new(()),
        })
    }

    pub fn transcripts_dir(&self) -> &Path {
        &self.transcripts_dir
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn cost_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}_cost.json"))
    }

    fn load_metadata(&self) -> Result<Metadata> {
        Ok(read_json(&self.metadata_path)?.unwrap_or_default())
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Append a message to a session's history, creating the session file
    /// on first write. The title is derived from the first user message.
    pub fn save_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        if !is_valid_session_id(session_id) {
            return Err(Error::Validation(format!(
                "invalid session_id format: {session_id}"
            )));
        }

        let path = self.session_path(session_id);
        let now = Utc::now();
        let mut session = read_json::<Session>(&path)?.unwrap_or_else(|| Session {
            session_id: session_id.to_owned(),
            title: String::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        });

        let message = Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_owned(),
            timestamp: now,
        };

        session.messages.push(message.clone());
        session.updated_at = now;

        // Title is set exactly once, from the first user message.
        if session.title.is_empty() && role == MessageRole::User {
            session.title = derive_title(content);
        }

        atomic_write_json(&path, &session)?;
        Ok(message)
    }

    /// Full session data. Invalid or unknown IDs read as `None`.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        if !is_valid_session_id(session_id) {
            return Ok(None);
        }
        read_json(&self.session_path(session_id))
    }

    /// Session summaries, newest activity first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.ends_with("_cost.json") {
                continue;
            }
            // Skip unreadable or partially migrated files.
            let Ok(Some(session)) = read_json::<Session>(&path) else {
                continue;
            };
            sessions.push(SessionSummary {
                session_id: session.session_id,
                title: if session.title.is_empty() {
                    "Untitled".into()
                } else {
                    session.title
                },
                created_at: session.created_at,
                updated_at: session.updated_at,
                message_count: session.messages.len(),
            });
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    /// Delete a session's history. Returns `false` for unknown or invalid IDs.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        if !is_valid_session_id(session_id) {
            return Ok(false);
        }
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    // ── Transcripts ─────────────────────────────────────────────────

    /// Register a transcript file in the metadata index.
    pub fn register_transcript(
        &self,
        file_path: &str,
        original_source: &str,
        source_type: SourceType,
        session_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<TranscriptMeta> {
        if let Some(sid) = session_id {
            if !is_valid_session_id(sid) {
                return Err(Error::Validation(format!(
                    "invalid session_id format: {sid}"
                )));
            }
        }

        let path = Path::new(file_path);
        let resolved = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let entry = TranscriptMeta {
            id: Uuid::new_v4().simple().to_string()[..8].to_owned(),
            filename: resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_path: resolved.to_string_lossy().into_owned(),
            original_source: original_source.to_owned(),
            source_type,
            created_at: Utc::now(),
            file_size: std::fs::metadata(&resolved).map(|m| m.len()).unwrap_or(0),
            session_id: session_id.map(str::to_owned),
            title: title.map(str::to_owned),
            format: resolved
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(d_format),
            duration: None,
        };

        let _guard = self.metadata_lock.lock();
        let mut metadata = self.load_metadata()?;
        metadata.transcripts.insert(entry.id.clone(), entry.clone());
        atomic_write_json(&self.metadata_path, &metadata)?;
        Ok(entry)
    }

    /// All registered transcripts, newest first.
    pub fn list_transcripts(&self) -> Result<Vec<TranscriptMeta>> {
        let metadata = self.load_metadata()?;
        let mut transcripts: Vec<_> = metadata.transcripts.into_values().collect();
        transcripts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transcripts)
    }

    pub fn get_transcript(&self, transcript_id: &str) -> Result<Option<TranscriptMeta>> {
        let metadata = self.load_metadata()?;
        Ok(metadata.transcripts.get(transcript_id).cloned())
    }

    /// Read the transcript's text body. `None` when the metadata exists but
    /// the backing file has gone missing.
    pub fn read_transcript_content(&self, transcript_id: &str) -> Result<Option<String>> {
        let Some(meta) = self.get_transcript(transcript_id)? else {
            return Ok(None);
        };
        match std::fs::read_to_string(&meta.file_path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(
                    transcript_id,
                    path = %meta.file_path,
                    "transcript metadata exists but file missing"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a transcript's metadata and, best-effort, its backing file.
    pub fn delete_transcript(&self, transcript_id: &str) -> Result<bool> {
        let entry = {
            let _guard = self.metadata_lock.lock();
            let mut metadata = self.load_metadata()?;
            let Some(entry) = metadata.transcripts.remove(transcript_id) else {
                return Ok(false);
            };
            atomic_write_json(&self.metadata_path, &metadata)?;
            entry
        };

        // The file may already be gone; that is not a failure.
        if let Err(e) = std::fs::remove_file(&entry.file_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    transcript_id,
                    error = %e,
                    "failed to remove transcript file"
                );
            }
        }
        Ok(true)
    }

    // ── Cost tracking ───────────────────────────────────────────────

    pub fn save_session_cost(&self, session_id: &str, cost: &SessionCost) -> Result<()> {
        if !is_valid_session_id(session_id) {
            return Err(Error::Validation(format!(
                "invalid session_id format: {session_id}"
            )));
        }
        atomic_write_json(&self.cost_path(session_id), cost)
    }

    pub fn get_session_cost(&self, session_id: &str) -> Result<Option<SessionCost>> {
        if !is_valid_session_id(session_id) {
            return Ok(None);
        }
        read_json(&self.cost_path(session_id))
    }

    /// Fold a finished session's cost into the global totals. The whole
    /// read-modify-write runs under the metadata mutex.
    pub fn update_global_cost(&self, session_cost: &SessionCost) -> Result<()> {
        let _guard = self.metadata_lock.lock();
        let mut metadata = self.load_metadata()?;
        metadata.global_cost.absorb(session_cost);
        atomic_write_json(&self.metadata_path, &metadata)
    }

    pub fn get_global_cost(&self) -> Result<GlobalCost> {
        Ok(self.load_metadata()?.global_cost)
    }

    // ── Exports ─────────────────────────────────────────────────────

    /// Sweep export files older than the TTL. Returns how many were removed.
    pub fn cleanup_old_exports(&self, ttl_hours: u64) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(ttl_hours * 3600);
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.exports_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified < cutoff {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "export cleanup failed");
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "cleaned up old exports");
        }
        Ok(removed)
    }
}

/// First user message, truncated to 50 characters plus an ellipsis.
fn derive_title(content: &str) -> String {
    let mut title: String = content.chars().take(50).collect();
    if content.chars().count() > 50 {
        title.push_str("...");
    }
    title
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
