//! Session registry and lifecycle.
//!
//! Wraps the actor pattern with service-level orchestration: double-checked
//! get-or-create, status reporting, TTL cleanup, and graceful shutdown of
//! every live actor. The registry lock is never held across an actor stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use va_agent::hooks::HookSet;
use va_agent::types::AgentConnector;
use va_audit::AuditHookFactory;
use va_audit::AuditService;
use va_domain::config::Config;
use va_domain::error::{Error, Result};
use va_storage::{is_valid_session_id, StorageManager};

use crate::actor::{ActorDeps, SessionActor};

/// Default system prompt for the video-understanding agent. The full prompt
/// text ships with the deployment, not with the core.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a video-understanding assistant. Use the registered tools to \
     transcribe videos and manage transcripts; report job progress honestly.";

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Processing,
    Closed,
}

/// Service layer for session management.
pub struct SessionService {
    config: Arc<Config>,
    storage: Arc<StorageManager>,
    audit: Option<Arc<AuditService>>,
    connector: Arc<dyn AgentConnector>,
    system_prompt: String,
    registry: Mutex<HashMap<String, Arc<SessionActor>>>,
}

impl SessionService {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<StorageManager>,
        connector: Arc<dyn AgentConnector>,
        audit: Option<Arc<AuditService>>,
    ) -> Self {
        Self {
            config,
            storage,
            audit,
            connector,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            registry: Mutex::new(HashMap::new()),
        }
    }

    fn hooks_for(&self, session_id: &str) -> HookSet {
        let mut hooks: HookSet = Vec::new();
        if let Some(audit) = &self.audit {
            hooks.push(Arc::new(AuditHookFactory::new(session_id, audit.clone())));
        }
        hooks
    }

    /// Retrieve an existing session actor or create and start a new one.
    ///
    /// Double-checked create: the fast check holds the lock, the slow
    /// actor startup happens outside it, and a re-check on install handles
    /// the race — the losing actor is stopped, the winner is returned.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<SessionActor>> {
        if !is_valid_session_id(session_id) {
            return Err(Error::Validation(format!(
                "invalid session_id format: {session_id}"
            )));
        }

        {
            let mut registry = self.registry.lock();
            if let Some(actor) = registry.get(session_id) {
                if actor.is_running() {
                    return Ok(actor.clone());
                }
                registry.remove(session_id);
                tracing::warn!(session_id, "cleaned up dead session");
            }
        }

        // Creating a session needs the upstream credential; fail fast with
        // a retryable service error instead of a doomed worker.
        let credential_env = &self.config.agent.credential_env;
        if !credential_env.is_empty() && std::env::var(credential_env).is_err() {
            return Err(Error::Unavailable(format!(
                "{credential_env} not configured"
            )));
        }

        tracing::info!(session_id, "initializing new session actor");
        let new_actor = Arc::new(SessionActor::new(
            session_id,
            &self.config,
            ActorDeps {
                connector: self.connector.clone(),
                storage: self.storage.clone(),
                hooks: self.hooks_for(session_id),
                system_prompt: self.system_prompt.clone(),
            },
        ));
        new_actor.start();

        let (winner, loser) = {
            let mut registry = self.registry.lock();
            match registry.get(session_id) {
                Some(existing) if existing.is_running() => {
                    // Another request won the race; ours stops.
                    (existing.clone(), Some(new_actor))
                }
                _ => {
                    registry.insert(session_id.to_owned(), new_actor.clone());
                    (new_actor, None)
                }
            }
        };

        if let Some(loser) = loser {
            tracing::info!(session_id, "session created by another request, reusing");
            loser.stop().await;
        }
        Ok(winner)
    }

    /// One full chat turn: resolve (or spawn) the session's actor, run the
    /// turn, and append both sides to the persisted history.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<crate::actor::MessageResponse> {
        let actor = self.get_or_create(session_id).await?;

        // The user's message is history the moment we accept it.
        let storage = self.storage.clone();
        let sid = session_id.to_owned();
        let user_text = text.to_owned();
        tokio::task::spawn_blocking(move || {
            storage.save_message(&sid, va_storage::MessageRole::User, &user_text)
        })
        .await
        .map_err(|e| Error::Other(format!("history write task panicked: {e}")))??;

        let response = actor.process_message(text).await?;

        let storage = self.storage.clone();
        let sid = session_id.to_owned();
        let agent_text = response.text.clone();
        tokio::task::spawn_blocking(move || {
            storage.save_message(&sid, va_storage::MessageRole::Agent, &agent_text)
        })
        .await
        .map_err(|e| Error::Other(format!("history write task panicked: {e}")))??;

        Ok(response)
    }

    /// Existing running actor, without creating one.
    pub fn get_actor(&self, session_id: &str) -> Option<Arc<SessionActor>> {
        let registry = self.registry.lock();
        registry
            .get(session_id)
            .filter(|actor| actor.is_running())
            .cloned()
    }

    pub fn get_status(&self, session_id: &str) -> SessionStatus {
        let Some(actor) = self.registry.lock().get(session_id).cloned() else {
            return SessionStatus::Closed;
        };
        if !actor.is_running() {
            return SessionStatus::Closed;
        }
        if actor.is_processing() {
            return SessionStatus::Processing;
        }
        if actor.greeting_delivered() {
            SessionStatus::Ready
        } else {
            SessionStatus::Initializing
        }
    }

    /// Close one session. Returns `false` when it was not active.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let actor = self.registry.lock().remove(session_id);
        match actor {
            Some(actor) => {
                actor.stop().await;
                tracing::info!(session_id, "closed session");
                true
            }
            None => false,
        }
    }

    /// Stop every active session concurrently. Used at shutdown.
    pub async fn close_all_sessions(&self) {
        let actors: Vec<_> = {
            let mut registry = self.registry.lock();
            registry.drain().map(|(_, actor)| actor).collect()
        };
        if actors.is_empty() {
            return;
        }
        tracing::info!(count = actors.len(), "closing active sessions");
        join_all(actors.iter().map(|actor| actor.stop())).await;
    }

    /// Periodic sweep removing expired or dead sessions. Actors are removed
    /// from the registry under the lock and stopped outside it, so a slow
    /// shutdown never blocks lookups.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.timeouts.cleanup_interval_secs);
        let ttl = Duration::from_secs(self.config.timeouts.session_ttl_secs);
        tracing::info!("session cleanup loop started");

        loop {
            tokio::time::sleep(interval).await;
            self.cleanup_once(ttl).await;
        }
    }

    /// One cleanup pass; factored out so tests can drive it directly.
    pub async fn cleanup_once(&self, ttl: Duration) -> usize {
        let expired: Vec<Arc<SessionActor>> = {
            let mut registry = self.registry.lock();
            let ids: Vec<String> = registry
                .iter()
                .filter(|(_, actor)| actor.is_expired(ttl) || !actor.is_running())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| {
                    tracing::info!(session_id = %id, "cleaning up expired session");
                    registry.remove(id)
                })
                .collect()
        };

        let count = expired.len();
        for actor in expired {
            actor.stop().await;
        }
        count
    }

    pub fn active_session_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.registry.lock().keys().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockConnector, ScriptedTurn};

    const SID: &str = "33333333-3333-4333-8333-333333333333";

    fn service(dir: &std::path::Path, turns: Vec<ScriptedTurn>) -> Arc<SessionService> {
        let mut config = Config::default();
        config.data_path = dir.to_path_buf();
        config.timeouts.greeting_timeout_secs = 2;
        config.timeouts.response_timeout_secs = 2;
        config.timeouts.graceful_shutdown_secs = 1;
        // No credential gate in tests.
        config.agent.credential_env = String::new();

        let storage = Arc::new(StorageManager::new(dir).unwrap());
        Arc::new(SessionService::new(
            Arc::new(config),
            storage,
            Arc::new(MockConnector::new(turns)),
            None,
        ))
    }

    #[tokio::test]
    async fn invalid_session_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![]);
        let err = service.get_or_create("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn missing_credential_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_path = dir.path().to_path_buf();
        config.agent.credential_env = "VA_TEST_CREDENTIAL_THAT_IS_NEVER_SET".into();
        let storage = Arc::new(StorageManager::new(dir.path()).unwrap());
        let service = SessionService::new(
            Arc::new(config),
            storage,
            Arc::new(MockConnector::new(vec![])),
            None,
        );

        let err = service.get_or_create(SID).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(service.active_session_count(), 0);
    }

    #[tokio::test]
    async fn get_or_create_reuses_running_actor() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hi")]);

        let first = service.get_or_create(SID).await.unwrap();
        let second = service.get_or_create(SID).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.active_session_count(), 1);

        service.close_all_sessions().await;
    }

    #[tokio::test]
    async fn concurrent_get_or_create_installs_one_actor() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![]);

        let (a, b, c) = tokio::join!(
            service.get_or_create(SID),
            service.get_or_create(SID),
            service.get_or_create(SID),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        let c = c.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(service.active_session_count(), 1);
        assert!(a.is_running());

        service.close_all_sessions().await;
    }

    #[tokio::test]
    async fn status_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hello")]);

        assert_eq!(service.get_status(SID), SessionStatus::Closed);

        let actor = service.get_or_create(SID).await.unwrap();
        assert_eq!(service.get_status(SID), SessionStatus::Initializing);

        actor.get_greeting().await.unwrap();
        assert_eq!(service.get_status(SID), SessionStatus::Ready);

        service.close_session(SID).await;
        assert_eq!(service.get_status(SID), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn close_session_removes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hi")]);

        let actor = service.get_or_create(SID).await.unwrap();
        actor.get_greeting().await.unwrap();

        assert!(service.close_session(SID).await);
        assert!(!actor.is_running());
        assert_eq!(service.active_session_count(), 0);
        // Second close reports not found.
        assert!(!service.close_session(SID).await);
    }

    #[tokio::test]
    async fn get_actor_only_returns_running() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hi")]);

        assert!(service.get_actor(SID).is_none());
        let actor = service.get_or_create(SID).await.unwrap();
        assert!(service.get_actor(SID).is_some());

        actor.stop().await;
        assert!(service.get_actor(SID).is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hi")]);

        let actor = service.get_or_create(SID).await.unwrap();
        actor.get_greeting().await.unwrap();

        // Nothing to do while the session is fresh.
        assert_eq!(service.cleanup_once(Duration::from_secs(60)).await, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let cleaned = service.cleanup_once(Duration::from_millis(10)).await;
        assert_eq!(cleaned, 1);
        assert_eq!(service.active_session_count(), 0);
        assert!(!actor.is_running());
    }

    #[tokio::test]
    async fn cleanup_removes_dead_sessions_regardless_of_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![ScriptedTurn::reply("hi")]);

        let actor = service.get_or_create(SID).await.unwrap();
        actor.stop().await;
        assert_eq!(service.active_session_count(), 1);

        let cleaned = service.cleanup_once(Duration::from_secs(3600)).await;
        assert_eq!(cleaned, 1);
        assert_eq!(service.active_session_count(), 0);
    }

    #[tokio::test]
    async fn close_all_sessions_stops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![]);
        let other = "44444444-4444-4444-8444-444444444444";

        let a = service.get_or_create(SID).await.unwrap();
        let b = service.get_or_create(other).await.unwrap();
        assert_eq!(service.active_session_count(), 2);

        service.close_all_sessions().await;
        assert_eq!(service.active_session_count(), 0);
        assert!(!a.is_running());
        assert!(!b.is_running());
    }
}
