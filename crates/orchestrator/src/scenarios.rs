//! End-to-end scenarios through the assembled container.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use va_domain::config::Config;
use va_storage::MessageRole;

use crate::container::ServiceContainer;
use crate::jobs::{JobState, JobType};
use crate::testkit::{assistant, result_ok, MockConnector, ScriptedTurn};

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data_path = dir.to_path_buf();
    config.timeouts.greeting_timeout_secs = 2;
    config.timeouts.response_timeout_secs = 3;
    config.timeouts.graceful_shutdown_secs = 1;
    config.jobs.poll_interval_ms = 20;
    config.agent.credential_env = String::new();
    config
}

async fn container_with(
    dir: &std::path::Path,
    turns: Vec<ScriptedTurn>,
) -> Arc<ServiceContainer> {
    ServiceContainer::startup(
        test_config(dir),
        Arc::new(MockConnector::new(turns)),
        None,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn happy_chat() {
    let dir = tempfile::tempdir().unwrap();
    let sid = "11111111-1111-4111-8111-111111111111";
    let container = container_with(
        dir.path(),
        vec![
            ScriptedTurn::reply("welcome"),
            ScriptedTurn::new(vec![
                assistant("m1", "hello to you", Some((120, 15))),
                result_ok(Some(0.003)),
            ]),
        ],
    )
    .await;

    let response = container.sessions().send_message(sid, "hello").await.unwrap();
    assert!(!response.text.is_empty());
    assert!(response.usage.cost_usd >= 0.0);

    let session = container.storage().get_session(sid).unwrap().unwrap();
    assert!(session.messages.len() >= 2);
    assert_eq!(session.messages[0].role, MessageRole::User);
    assert_eq!(session.messages[0].content, "hello");
    assert_eq!(session.messages[1].role, MessageRole::Agent);
    assert_eq!(session.title, "hello");

    container.shutdown().await;
}

#[tokio::test]
async fn blocked_tool_emits_single_blocked_event() {
    let dir = tempfile::tempdir().unwrap();
    let sid = "22222222-2222-4222-8222-222222222222";
    // The greeting turn carries the dangerous tool attempt so hooks fire
    // through the scripted client exactly like the SDK would.
    let turns = vec![ScriptedTurn::reply("understood")
        .with_tool_call(
            "tu_danger",
            "Bash",
            json!({"command": "rm -rf /"}),
            json!({"ok": true}),
        )];
    let container = container_with(dir.path(), turns).await;

    let actor = container.sessions().get_or_create(sid).await.unwrap();
    let greeting = actor.get_greeting().await.unwrap();
    assert!(!greeting.text.is_empty());

    let blocked = container
        .audit()
        .get_session_audit_log(sid, 10, 0, Some("tool_blocked"))
        .await;
    assert_eq!(blocked.total_count, 1);
    assert!(blocked.entries[0].summary.contains("rm -rf /"));

    // A blocked invocation never produces a post event.
    let post = container
        .audit()
        .get_session_audit_log(sid, 10, 0, Some("post_tool_use"))
        .await;
    assert_eq!(post.total_count, 0);

    container.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn protected_path_via_symlink_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let sid = "66666666-6666-4666-8666-666666666666";

    let link = dir.path().join("tmp-link");
    std::os::unix::fs::symlink("/etc", &link).unwrap();
    let target = link.join("passwd");

    let turns = vec![ScriptedTurn::reply("noted").with_tool_call(
        "tu_write",
        "Write",
        json!({"file_path": target.to_string_lossy()}),
        json!({"ok": true}),
    )];
    let container = container_with(dir.path(), turns).await;

    let actor = container.sessions().get_or_create(sid).await.unwrap();
    actor.get_greeting().await.unwrap();

    let blocked = container
        .audit()
        .get_session_audit_log(sid, 10, 0, Some("tool_blocked"))
        .await;
    assert_eq!(blocked.total_count, 1);
    assert!(blocked.entries[0]
        .summary
        .contains("Cannot modify protected path"));

    container.shutdown().await;
}

#[tokio::test]
async fn concurrent_get_or_create_returns_one_actor() {
    let dir = tempfile::tempdir().unwrap();
    let sid = "33333333-3333-4333-8333-333333333333";
    let container = container_with(dir.path(), vec![]).await;

    let (a, b, c) = tokio::join!(
        container.sessions().get_or_create(sid),
        container.sessions().get_or_create(sid),
        container.sessions().get_or_create(sid),
    );
    let a = a.unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap()));
    assert_eq!(container.sessions().active_session_count(), 1);

    container.shutdown().await;
}

#[tokio::test]
async fn audit_pagination_over_ten_events() {
    let dir = tempfile::tempdir().unwrap();
    let container = container_with(dir.path(), vec![]).await;

    for i in 0..10 {
        let mut event = va_domain::audit::ToolAuditEvent::new(
            va_domain::audit::AuditEventType::PostToolUse,
            "paginated",
            "Bash",
            json!({"i": i}),
        );
        event.success = Some(true);
        event.duration_ms = Some(i as f64);
        container.audit().log_event(event).await;
    }

    let head = container
        .audit()
        .get_session_audit_log("paginated", 3, 0, None)
        .await;
    assert_eq!(head.entries.len(), 3);
    assert!(head.has_more);
    assert_eq!(head.total_count, 10);

    let tail = container
        .audit()
        .get_session_audit_log("paginated", 3, 9, None)
        .await;
    assert_eq!(tail.entries.len(), 1);
    assert!(!tail.has_more);
    assert_eq!(tail.total_count, 10);

    container.shutdown().await;
}

#[tokio::test]
async fn interrupted_jobs_restored_and_completed() {
    let dir = tempfile::tempdir().unwrap();

    // Previous process dies with two running jobs on disk.
    let (id1, id2) = {
        let queue = crate::jobs::JobQueue::new(dir.path(), &Config::default().jobs).unwrap();
        let a = queue.create_job(JobType::Transcription, json!({"n": 1}));
        let b = queue.create_job(JobType::Transcription, json!({"n": 2}));
        queue.claim_next().unwrap();
        queue.claim_next().unwrap();
        (a.id, b.id)
    };

    let queue = Arc::new(
        crate::jobs::JobQueue::new(
            dir.path(),
            &va_domain::config::JobConfig {
                max_concurrent: 2,
                poll_interval_ms: 20,
            },
        )
        .unwrap(),
    );
    assert_eq!(queue.restore_pending_jobs(), 2);
    assert_eq!(queue.get_job(&id1).unwrap().state, JobState::Pending);
    assert_eq!(queue.get_job(&id2).unwrap().state, JobState::Pending);

    struct Instant0;
    #[async_trait::async_trait]
    impl crate::jobs::JobHandler for Instant0 {
        async fn run(
            &self,
            _job: &crate::jobs::Job,
            _ctx: &crate::jobs::JobContext,
        ) -> va_domain::error::Result<()> {
            Ok(())
        }
    }
    queue.register_handler(JobType::Transcription, Arc::new(Instant0));
    queue.clone().run_job_processor_loop(None);

    for id in [id1, id2] {
        for _ in 0..200 {
            if queue.get_job(&id).unwrap().state == JobState::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.get_job(&id).unwrap().state, JobState::Succeeded);
    }

    queue.shutdown(Duration::from_secs(1)).await;
}
