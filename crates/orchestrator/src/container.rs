//! Service container: wiring, background tasks, and lifecycle.
//!
//! Startup builds the components leaves-first (storage → audit → sessions →
//! transcription → knowledge graph → jobs), restores interrupted jobs, then
//! starts the worker pool and the periodic maintenance tasks. Shutdown is
//! idempotent and closes everything in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use va_agent::types::AgentConnector;
use va_audit::AuditService;
use va_domain::config::Config;
use va_domain::error::Result;
use va_storage::StorageManager;

use crate::jobs::{JobQueue, JobType};
use crate::kg::KnowledgeGraphService;
use crate::sessions::SessionService;
use crate::transcription::{Transcriber, TranscriptionJobHandler, TranscriptionService};

/// Typed dependency root owning every core service and the always-on
/// background tasks.
pub struct ServiceContainer {
    config: Arc<Config>,
    storage: Arc<StorageManager>,
    audit: Arc<AuditService>,
    sessions: Arc<SessionService>,
    transcription: Arc<TranscriptionService>,
    kg: Arc<KnowledgeGraphService>,
    jobs: Arc<JobQueue>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl ServiceContainer {
    /// Initialize all services and start background tasks.
    ///
    /// The agent connector and transcriber are injected: the SDK binding
    /// and the media pipeline ship with the deployment, not the core.
    pub async fn startup(
        config: Config,
        connector: Arc<dyn AgentConnector>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Result<Arc<Self>> {
        tracing::info!("starting service container");
        let config = Arc::new(config);

        let storage = Arc::new(StorageManager::new(&config.data_path)?);
        let audit = Arc::new(AuditService::new(&config.data_path, &config.audit)?);
        let sessions = Arc::new(SessionService::new(
            config.clone(),
            storage.clone(),
            connector,
            Some(audit.clone()),
        ));
        let transcription = Arc::new(TranscriptionService::new(storage.clone()));
        let kg = Arc::new(KnowledgeGraphService::new(
            audit.clone(),
            config.kg.entity_resolution_enabled,
        ));

        let jobs = Arc::new(JobQueue::new(&config.data_path, &config.jobs)?);
        if let Some(transcriber) = transcriber {
            jobs.register_handler(
                JobType::Transcription,
                Arc::new(TranscriptionJobHandler::new(
                    transcriber,
                    transcription.clone(),
                )),
            );
        }

        // Restore persisted jobs before the workers start picking.
        let restored = jobs.restore_pending_jobs();
        if restored > 0 {
            tracing::info!(restored, "restored pending jobs from disk");
        }
        jobs.clone().run_job_processor_loop(None);

        let container = Arc::new(Self {
            config,
            storage,
            audit,
            sessions,
            transcription,
            kg,
            jobs,
            background: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });

        let mut background = container.background.lock();
        background.push(tokio::spawn(
            container.sessions.clone().run_cleanup_loop(),
        ));
        background.push(tokio::spawn(maintenance_loop(
            container.audit.clone(),
            container.storage.clone(),
            container.config.clone(),
        )));
        drop(background);

        tracing::info!("service container started");
        Ok(container)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn audit(&self) -> &Arc<AuditService> {
        &self.audit
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    pub fn transcription(&self) -> &Arc<TranscriptionService> {
        &self.transcription
    }

    pub fn kg(&self) -> &Arc<KnowledgeGraphService> {
        &self.kg
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    /// Gracefully shut everything down. A double shutdown is a no-op.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutting down service container");

        let background: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in background {
            handle.abort();
            let _ = handle.await;
        }

        self.jobs
            .shutdown(Duration::from_secs(
                self.config.timeouts.graceful_shutdown_secs,
            ))
            .await;

        self.sessions.close_all_sessions().await;

        // Flush any dirty aggregate stats.
        let _ = self.audit.get_stats().await;

        tracing::info!("service container shutdown complete");
    }
}

/// Periodic maintenance: audit retention and export TTL sweeps, on the same
/// cadence as session cleanup.
async fn maintenance_loop(
    audit: Arc<AuditService>,
    storage: Arc<StorageManager>,
    config: Arc<Config>,
) {
    let interval = Duration::from_secs(config.timeouts.cleanup_interval_secs);
    loop {
        tokio::time::sleep(interval).await;

        audit.cleanup_old_logs().await;

        let storage = storage.clone();
        let ttl = config.exports.ttl_hours;
        let result =
            tokio::task::spawn_blocking(move || storage.cleanup_old_exports(ttl)).await;
        if let Ok(Err(e)) = result {
            tracing::warn!(error = %e, "export cleanup failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
