//! Transcript workflows.
//!
//! The actual media pipeline (download, ffmpeg, ASR) lives behind the
//! [`Transcriber`] seam; this module orchestrates registration and
//! retrieval against the storage layer and adapts transcription work to
//! the job queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use va_domain::error::{Error, Result};
use va_storage::{SourceType, StorageManager, TranscriptMeta};

use crate::jobs::{CancelToken, Job, JobContext, JobHandler};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produces a transcript text file for a media source. Implementations
/// must observe the cancel token at reasonable granularity.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        source: &str,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transcript metadata plus its text body.
#[derive(Debug, Clone)]
pub struct TranscriptContent {
    pub metadata: TranscriptMeta,
    pub content: String,
}

/// Service layer for transcript save and retrieval workflows.
pub struct TranscriptionService {
    storage: Arc<StorageManager>,
}

impl TranscriptionService {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }

    /// Register an existing transcript file.
    pub fn save_transcript(
        &self,
        file_path: &str,
        original_source: &str,
        source_type: SourceType,
        session_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<TranscriptMeta> {
        if !Path::new(file_path).exists() {
            return Err(Error::NotFound(format!(
                "transcript file not found: {file_path}"
            )));
        }

        let metadata = self.storage.register_transcript(
            file_path,
            original_source,
            source_type,
            session_id,
            title,
        )?;
        tracing::info!(
            transcript_id = %metadata.id,
            filename = %metadata.filename,
            source_type = ?source_type,
            "transcript registered"
        );
        Ok(metadata)
    }

    /// Metadata and text body. `None` when unknown or the backing file has
    /// gone missing.
    pub fn get_transcript(&self, transcript_id: &str) -> Result<Option<TranscriptContent>> {
        let Some(metadata) = self.storage.get_transcript(transcript_id)? else {
            tracing::warn!(transcript_id, "transcript not found");
            return Ok(None);
        };
        let Some(content) = self.storage.read_transcript_content(transcript_id)? else {
            return Ok(None);
        };
        Ok(Some(TranscriptContent { metadata, content }))
    }

    pub fn list_transcripts(&self) -> Result<Vec<TranscriptMeta>> {
        self.storage.list_transcripts()
    }

    pub fn transcript_metadata(&self, transcript_id: &str) -> Result<Option<TranscriptMeta>> {
        self.storage.get_transcript(transcript_id)
    }

    pub fn delete_transcript(&self, transcript_id: &str) -> Result<bool> {
        let deleted = self.storage.delete_transcript(transcript_id)?;
        if deleted {
            tracing::info!(transcript_id, "deleted transcript");
        } else {
            tracing::warn!(transcript_id, "cannot delete: transcript not found");
        }
        Ok(deleted)
    }

    pub fn transcripts_dir(&self) -> &Path {
        self.storage.transcripts_dir()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Payload carried in a transcription job's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub source: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Runs transcription jobs: drives the [`Transcriber`] and registers the
/// produced file.
pub struct TranscriptionJobHandler {
    transcriber: Arc<dyn Transcriber>,
    service: Arc<TranscriptionService>,
}

impl TranscriptionJobHandler {
    pub fn new(transcriber: Arc<dyn Transcriber>, service: Arc<TranscriptionService>) -> Self {
        Self {
            transcriber,
            service,
        }
    }
}

#[async_trait]
impl JobHandler for TranscriptionJobHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<()> {
        let request: TranscriptionRequest = serde_json::from_value(job.metadata.clone())
            .map_err(|e| Error::Validation(format!("bad transcription job metadata: {e}")))?;

        ctx.report_progress(0.1);
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("transcription cancelled".into()));
        }

        let output = self
            .transcriber
            .transcribe(
                &request.source,
                self.service.transcripts_dir(),
                &ctx.cancel_token(),
            )
            .await?;
        ctx.report_progress(0.9);

        if ctx.is_cancelled() {
            return Err(Error::Cancelled("transcription cancelled".into()));
        }

        self.service.save_transcript(
            &output.to_string_lossy(),
            &request.source,
            request.source_type,
            request.session_id.as_deref(),
            request.title.as_deref(),
        )?;
        ctx.report_progress(1.0);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
