//! Per-session agent actor.
//!
//! The upstream conversation object is stateful and not safe to call
//! concurrently, so exactly one worker task owns it for the session's whole
//! life. Callers talk to the worker through bounded channels: a full input
//! queue is backpressure surfaced to the API layer, a closed response
//! channel means the worker is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use futures_util::StreamExt;

use va_agent::hooks::HookSet;
use va_agent::permission::PathPolicy;
use va_agent::types::{AgentClient, AgentConnector, AgentMessage, AgentOptions, ContentBlock};
use va_domain::config::{Config, TimeoutConfig};
use va_domain::cost::{SessionCost, UsageData};
use va_domain::error::{Error, Result};
use va_storage::StorageManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cumulative session usage attached to every response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

impl MessageUsage {
    fn cumulative(cost: &SessionCost) -> Self {
        Self {
            input_tokens: cost.total_input_tokens,
            output_tokens: cost.total_output_tokens,
            cache_creation_tokens: cost.total_cache_creation_tokens,
            cache_read_tokens: cost.total_cache_read_tokens,
            cost_usd: cost.reported_cost_usd,
        }
    }
}

/// One assistant turn delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub text: String,
    pub usage: MessageUsage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixed user-visible strings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const GREETING_PROMPT: &str =
    "Greet the user, list the accepted video sources (local files and YouTube URLs), \
     and ask about language and quality preferences before starting.";

const GREETING_TIMEOUT_FALLBACK: &str =
    "Hello! I'm ready to help you transcribe videos. (Note: Initialization was slow)";

const GREETING_ERROR_FALLBACK: &str =
    "Hello! I encountered an issue during startup but I'm ready to help.";

const EMPTY_RESPONSE_FALLBACK: &str =
    "I've processed your request. Please check the Jobs panel for any background tasks.";

/// Map a result-message subtype to a user-visible error sentence. `None`
/// means the turn succeeded. Raw SDK errors never reach the caller.
fn classify_result(subtype: Option<&str>, is_error: bool) -> Option<String> {
    match subtype {
        Some("success") => None,
        None if !is_error => None,
        Some("error_max_structured_output_retries") => Some(
            "I had trouble formatting my response correctly. \
             This usually resolves on retry. Please try your request again."
                .into(),
        ),
        Some("interrupted") => Some("The request was interrupted.".into()),
        Some("error_during_execution") => Some(
            "An error occurred while executing a tool. \
             Please check the tool inputs and try again."
                .into(),
        ),
        _ if is_error => Some("An error occurred processing your request.".into()),
        _ => None,
    }
}

/// Structured (schema-validated) output is preferred; raw text blocks are
/// the fallback.
fn extract_message_text(
    content: &[ContentBlock],
    structured: Option<&serde_json::Value>,
) -> Vec<String> {
    if let Some(value) = structured {
        match value.get("message").and_then(serde_json::Value::as_str) {
            Some(message) if !message.is_empty() => return vec![message.to_owned()],
            Some(_) => tracing::warn!("structured output has empty message"),
            None => {}
        }
    }

    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the worker needs to run a conversation.
pub struct ActorDeps {
    pub connector: Arc<dyn AgentConnector>,
    pub storage: Arc<StorageManager>,
    pub hooks: HookSet,
    pub system_prompt: String,
}

enum ActorInput {
    Message(String),
    /// Sentinel pushed by `stop()` to unblock the queue waiter.
    Shutdown,
}

struct WorkerSeed {
    input_rx: mpsc::Receiver<ActorInput>,
    greeting_tx: mpsc::Sender<MessageResponse>,
    response_tx: mpsc::Sender<Result<MessageResponse>>,
    deps: ActorDeps,
}

/// A dedicated actor owning one upstream conversation in its own task.
pub struct SessionActor {
    session_id: String,
    timeouts: TimeoutConfig,
    model: String,
    max_turns: u32,

    input_tx: mpsc::Sender<ActorInput>,
    response_rx: tokio::sync::Mutex<mpsc::Receiver<Result<MessageResponse>>>,
    greeting_rx: tokio::sync::Mutex<mpsc::Receiver<MessageResponse>>,
    greeting_delivered: AtomicBool,

    running: Arc<AtomicBool>,
    processing: AtomicBool,
    last_activity: Mutex<Instant>,
    last_error: Arc<Mutex<Option<String>>>,

    worker: Mutex<Option<JoinHandle<()>>>,
    seed: Mutex<Option<WorkerSeed>>,
}

impl std::fmt::Debug for SessionActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionActor")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionActor {
    pub fn new(session_id: impl Into<String>, config: &Config, deps: ActorDeps) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.queue_max_size);
        let (response_tx, response_rx) = mpsc::channel(config.queue_max_size);
        let (greeting_tx, greeting_rx) = mpsc::channel(1);

        Self {
            session_id: session_id.into(),
            timeouts: config.timeouts.clone(),
            model: config.agent.model.clone(),
            max_turns: config.agent.max_turns,
            input_tx,
            response_rx: tokio::sync::Mutex::new(response_rx),
            greeting_rx: tokio::sync::Mutex::new(greeting_rx),
            greeting_delivered: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            processing: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            last_error: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            seed: Mutex::new(Some(WorkerSeed {
                input_rx,
                greeting_tx,
                response_tx,
                deps,
            })),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Whether the initial greeting has been handed to a caller.
    pub fn greeting_delivered(&self) -> bool {
        self.greeting_delivered.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Update the activity timestamp.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Whether the session has been inactive for longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.lock().elapsed() > ttl
    }

    /// Spawn the background worker. Idempotent; only the first call starts
    /// a worker.
    pub fn start(&self) {
        let Some(seed) = self.seed.lock().take() else {
            return;
        };
        self.running.store(true, Ordering::Release);

        let ctx = WorkerCtx {
            session_id: self.session_id.clone(),
            model: self.model.clone(),
            max_turns: self.max_turns,
            running: self.running.clone(),
            last_error: self.last_error.clone(),
        };
        let handle = tokio::spawn(worker_loop(ctx, seed));
        *self.worker.lock() = Some(handle);
    }

    /// Wait for the initial greeting. Times out to a canned fallback so a
    /// slow upstream never blanks the UI.
    pub async fn get_greeting(&self) -> Result<MessageResponse> {
        if !self.is_running() {
            return Err(Error::SessionClosed(self.session_id.clone()));
        }
        self.touch();

        let mut rx = self.greeting_rx.lock().await;
        let window = Duration::from_secs(self.timeouts.greeting_timeout_secs);
        let response = match timeout(window, rx.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                // Worker exited before producing a greeting.
                tracing::warn!(session_id = %self.session_id, "greeting channel closed");
                MessageResponse {
                    text: GREETING_ERROR_FALLBACK.into(),
                    usage: MessageUsage::default(),
                }
            }
            Err(_) => {
                tracing::warn!(session_id = %self.session_id, "greeting timed out");
                MessageResponse {
                    text: GREETING_TIMEOUT_FALLBACK.into(),
                    usage: MessageUsage::default(),
                }
            }
        };
        self.greeting_delivered.store(true, Ordering::Release);
        Ok(response)
    }

    /// Send one user turn and wait for one assistant turn.
    ///
    /// A full input queue is rejected immediately (backpressure, not a
    /// heap queue). A timeout abandons the wait but leaves the worker and
    /// its conversation state alive for the next message.
    pub async fn process_message(&self, text: &str) -> Result<MessageResponse> {
        if !self.is_running() {
            return Err(Error::SessionClosed(self.session_id.clone()));
        }
        self.touch();
        self.processing.store(true, Ordering::Release);
        let result = self.process_inner(text).await;
        self.processing.store(false, Ordering::Release);
        self.touch();
        result
    }

    async fn process_inner(&self, text: &str) -> Result<MessageResponse> {
        self.input_tx
            .try_send(ActorInput::Message(text.to_owned()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull(format!(
                    "session {} input queue is full",
                    self.session_id
                )),
                mpsc::error::TrySendError::Closed(_) => {
                    Error::SessionClosed(self.session_id.clone())
                }
            })?;

        let mut rx = self.response_rx.lock().await;
        let window = Duration::from_secs(self.timeouts.response_timeout_secs);
        match timeout(window, rx.recv()).await {
            Ok(Some(result)) => result,
            // Sender dropped: the worker exited (crash or stop).
            Ok(None) => Err(Error::SessionClosed(format!(
                "session {} worker stopped unexpectedly",
                self.session_id
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "response timed out after {} seconds",
                self.timeouts.response_timeout_secs
            ))),
        }
    }

    /// Signal the worker to stop, wait for the graceful window, then
    /// force-cancel. Idempotent.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);

        // Sentinel unblocks a worker waiting on the input queue. Ignore a
        // full queue; the worker re-checks the running flag at 1 Hz anyway.
        let _ = self.input_tx.try_send(ActorInput::Shutdown);

        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        let grace = Duration::from_secs(self.timeouts.graceful_shutdown_secs);
        if timeout(grace, &mut handle).await.is_err() {
            handle.abort();
            let _ = handle.await;
            tracing::debug!(session_id = %self.session_id, "worker force-cancelled");
        } else if was_running {
            tracing::debug!(session_id = %self.session_id, "worker exited gracefully");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WorkerCtx {
    session_id: String,
    model: String,
    max_turns: u32,
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
}

async fn worker_loop(ctx: WorkerCtx, seed: WorkerSeed) {
    tracing::info!(session_id = %ctx.session_id, "worker started");

    let mut cost = SessionCost::new(&ctx.session_id);
    let storage = seed.deps.storage.clone();

    let reason = match run_conversation(&ctx, seed, &mut cost).await {
        Ok(reason) => reason.to_owned(),
        Err(e) => {
            tracing::error!(session_id = %ctx.session_id, error = %e, "worker crashed");
            *ctx.last_error.lock() = Some(e.to_string());
            format!("crashed: {e}")
        }
    };

    // Persist cost before shutdown; aggregation into the global totals
    // happens at the same point.
    let session_id = ctx.session_id.clone();
    let final_cost = cost.clone();
    let persisted = tokio::task::spawn_blocking(move || -> Result<()> {
        storage.save_session_cost(&session_id, &final_cost)?;
        storage.update_global_cost(&final_cost)?;
        Ok(())
    })
    .await;
    match persisted {
        Ok(Ok(())) => {
            tracing::info!(
                session_id = %ctx.session_id,
                cost_usd = cost.reported_cost_usd,
                "saved session cost"
            );
        }
        Ok(Err(e)) => {
            tracing::error!(session_id = %ctx.session_id, error = %e, "failed to save cost data");
        }
        Err(e) => {
            tracing::error!(session_id = %ctx.session_id, error = %e, "cost save task panicked");
        }
    }

    ctx.running.store(false, Ordering::Release);
    tracing::info!(session_id = %ctx.session_id, reason = %reason, "worker shutdown");
}

async fn run_conversation(
    ctx: &WorkerCtx,
    seed: WorkerSeed,
    cost: &mut SessionCost,
) -> Result<&'static str> {
    let WorkerSeed {
        mut input_rx,
        greeting_tx,
        response_tx,
        deps,
    } = seed;

    let options = AgentOptions {
        model: ctx.model.clone(),
        system_prompt: deps.system_prompt,
        max_turns: ctx.max_turns,
        hooks: deps.hooks,
        permission: Some(Arc::new(PathPolicy::with_system_defaults())),
    };
    let mut client = deps.connector.connect(options).await?;

    // Initial greeting turn. A failure here must not kill the session;
    // the caller gets a fallback and the loop proceeds.
    match run_turn(ctx, client.as_mut(), GREETING_PROMPT, cost).await {
        Ok(response) => {
            let _ = greeting_tx.try_send(response);
        }
        Err(e) => {
            tracing::error!(session_id = %ctx.session_id, error = %e, "greeting failed");
            let _ = greeting_tx.try_send(MessageResponse {
                text: GREETING_ERROR_FALLBACK.into(),
                usage: MessageUsage::default(),
            });
        }
    }

    tracing::info!(session_id = %ctx.session_id, "ready for input");

    loop {
        if !ctx.running.load(Ordering::Acquire) {
            return Ok("stop requested");
        }

        // Short poll so the running flag is re-checked at least at 1 Hz.
        let input = match timeout(Duration::from_secs(1), input_rx.recv()).await {
            Err(_) => continue,
            Ok(None) => return Ok("input channel closed"),
            Ok(Some(ActorInput::Shutdown)) => return Ok("shutdown sentinel"),
            Ok(Some(ActorInput::Message(text))) => text,
        };

        // Errors travel to the caller as values; only a closed response
        // channel ends the loop.
        let outcome = run_turn(ctx, client.as_mut(), &input, cost).await;
        if let Err(e) = &outcome {
            tracing::error!(session_id = %ctx.session_id, error = %e, "error processing message");
        }
        if response_tx.send(outcome).await.is_err() {
            return Ok("response channel closed");
        }
    }
}

/// Run one turn: send the prompt, stream the response, fold usage into the
/// session cost, and assemble the final text.
async fn run_turn(
    ctx: &WorkerCtx,
    client: &mut dyn AgentClient,
    prompt: &str,
    cost: &mut SessionCost,
) -> Result<MessageResponse> {
    client.query(prompt).await?;

    let mut texts: Vec<String> = Vec::new();
    let mut turn_error: Option<String> = None;

    {
        let mut stream = client.receive_response();
        while let Some(message) = stream.next().await {
            match message {
                AgentMessage::Assistant {
                    id,
                    content,
                    structured_output,
                    usage,
                } => {
                    if let (Some(id), Some(usage)) = (id.as_deref(), usage.as_ref()) {
                        if !id.is_empty() {
                            cost.add_usage(&UsageData {
                                message_id: id.to_owned(),
                                input_tokens: usage.input_tokens,
                                output_tokens: usage.output_tokens,
                                cache_creation_input_tokens: usage.cache_creation_input_tokens,
                                cache_read_input_tokens: usage.cache_read_input_tokens,
                            });
                        }
                    }
                    texts.extend(extract_message_text(&content, structured_output.as_ref()));
                }
                AgentMessage::Result {
                    subtype,
                    is_error,
                    total_cost_usd,
                } => {
                    if let Some(cost_usd) = total_cost_usd {
                        cost.set_reported_cost(cost_usd);
                    }
                    turn_error = classify_result(subtype.as_deref(), is_error);
                }
                AgentMessage::Other => {}
            }
        }
    }

    let mut final_text = match turn_error {
        Some(error_text) => error_text,
        None => texts.join("\n"),
    };

    // Emptiness must never reach the caller as an empty reply.
    if final_text.trim().is_empty() {
        tracing::warn!(session_id = %ctx.session_id, "empty response text, using fallback");
        final_text = EMPTY_RESPONSE_FALLBACK.into();
    }

    Ok(MessageResponse {
        text: final_text,
        usage: MessageUsage::cumulative(cost),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
