//! Test support: a scripted agent connector.
//!
//! Each `query` pops the next scripted turn; `receive_response` then yields
//! that turn's messages. Tool invocations in a turn drive the registered
//! hooks exactly like the real SDK: pre hook first, post hook only when the
//! invocation was not denied.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use serde_json::Value;

use va_agent::hooks::{run_pre_tool_use, HookDecision, HookSet, ToolHookPayload};
use va_agent::types::{
    AgentClient, AgentConnector, AgentMessage, AgentOptions, ContentBlock, Usage,
};
use va_domain::error::{Error, Result};

// ── message builders ────────────────────────────────────────────────

pub fn assistant(id: &str, text: &str, usage: Option<(u64, u64)>) -> AgentMessage {
    AgentMessage::Assistant {
        id: Some(id.to_owned()),
        content: vec![ContentBlock::Text { text: text.to_owned() }],
        structured_output: None,
        usage: usage.map(|(input, output)| Usage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }),
    }
}

pub fn result_ok(total_cost_usd: Option<f64>) -> AgentMessage {
    AgentMessage::Result {
        subtype: Some("success".into()),
        is_error: false,
        total_cost_usd,
    }
}

pub fn result_error(subtype: &str) -> AgentMessage {
    AgentMessage::Result {
        subtype: Some(subtype.to_owned()),
        is_error: true,
        total_cost_usd: None,
    }
}

// ── scripted turns ──────────────────────────────────────────────────

/// A simulated tool invocation within a turn.
#[derive(Clone)]
pub struct ScriptedToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_response: Value,
}

#[derive(Clone, Default)]
pub struct ScriptedTurn {
    pub delay: Option<Duration>,
    pub query_error: Option<String>,
    pub tool_calls: Vec<ScriptedToolCall>,
    pub messages: Vec<AgentMessage>,
}

impl ScriptedTurn {
    pub fn new(messages: Vec<AgentMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// A plain successful assistant reply.
    pub fn reply(text: &str) -> Self {
        Self::new(vec![
            AgentMessage::Assistant {
                id: None,
                content: vec![ContentBlock::Text { text: text.to_owned() }],
                structured_output: None,
                usage: None,
            },
            result_ok(Some(0.0)),
        ])
    }

    /// A turn whose `query` fails outright.
    pub fn query_failure(message: &str) -> Self {
        Self {
            query_error: Some(message.to_owned()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_tool_call(
        mut self,
        tool_use_id: &str,
        tool_name: &str,
        tool_input: Value,
        tool_response: Value,
    ) -> Self {
        self.tool_calls.push(ScriptedToolCall {
            tool_use_id: tool_use_id.to_owned(),
            tool_name: tool_name.to_owned(),
            tool_input,
            tool_response,
        });
        self
    }
}

// ── connector & client ──────────────────────────────────────────────

pub struct MockConnector {
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into())),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connect_count_handle(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

#[async_trait]
impl AgentConnector for MockConnector {
    async fn connect(&self, options: AgentOptions) -> Result<Box<dyn AgentClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            turns: self.turns.clone(),
            hooks: options.hooks,
            current: Vec::new(),
        }))
    }
}

pub struct MockClient {
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    hooks: HookSet,
    current: Vec<AgentMessage>,
}

#[async_trait]
impl AgentClient for MockClient {
    async fn query(&mut self, _text: &str) -> Result<()> {
        // Exhausted scripts fall back to a plain reply so shutdown paths
        // never wedge on a missing turn.
        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::reply("ok"));

        if let Some(delay) = turn.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = turn.query_error {
            return Err(Error::Agent(message));
        }

        for call in &turn.tool_calls {
            let pre = ToolHookPayload {
                tool_name: call.tool_name.clone(),
                tool_input: call.tool_input.clone(),
                tool_response: None,
            };
            let decision =
                run_pre_tool_use(&self.hooks, &pre, Some(&call.tool_use_id)).await;
            if decision == HookDecision::Continue {
                let post = ToolHookPayload {
                    tool_name: call.tool_name.clone(),
                    tool_input: call.tool_input.clone(),
                    tool_response: Some(call.tool_response.clone()),
                };
                for hook in &self.hooks {
                    hook.on_post_tool_use(&post, Some(&call.tool_use_id)).await;
                }
            }
        }

        self.current = turn.messages;
        Ok(())
    }

    fn receive_response(&mut self) -> BoxStream<'_, AgentMessage> {
        Box::pin(stream::iter(std::mem::take(&mut self.current)))
    }
}
