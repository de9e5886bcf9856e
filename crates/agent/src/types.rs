//! Typed messages and client traits for the upstream SDK.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use va_domain::error::Result;

use crate::hooks::HookSet;
use crate::permission::PermissionHandler;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One block of assistant message content. Non-text blocks (tool use,
/// thinking) are carried opaquely and skipped during text extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Per-message token usage as reported by the SDK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// A message yielded while streaming one turn's response.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// Assistant output. `structured_output` is present when the SDK
    /// validated the response against the configured JSON schema.
    Assistant {
        id: Option<String>,
        content: Vec<ContentBlock>,
        structured_output: Option<Value>,
        usage: Option<Usage>,
    },
    /// Terminal message of a turn, carrying the outcome and the
    /// cumulative session cost.
    Result {
        subtype: Option<String>,
        is_error: bool,
        total_cost_usd: Option<f64>,
    },
    /// Anything else in the stream (system notices, partial events).
    Other,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for establishing one agent conversation.
#[derive(Clone, Default)]
pub struct AgentOptions {
    pub model: String,
    pub system_prompt: String,
    pub max_turns: u32,
    /// Hooks fired around every tool invocation and at stop events.
    pub hooks: HookSet,
    /// Pre-invocation ACL callback.
    pub permission: Option<Arc<dyn PermissionHandler>>,
}

/// A live, stateful conversation. Not safe for concurrent use — exactly
/// one session worker owns a client for its whole life.
#[async_trait]
pub trait AgentClient: Send {
    /// Send one user turn.
    async fn query(&mut self, text: &str) -> Result<()>;

    /// Stream the messages of the current turn. The stream ends after the
    /// turn's `Result` message.
    fn receive_response(&mut self) -> BoxStream<'_, AgentMessage>;
}

/// Factory for agent conversations; the acquire side of the SDK's
/// acquire/release pair.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, options: AgentOptions) -> Result<Box<dyn AgentClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_text_roundtrip() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type": "text", "text": "hello"}"#).unwrap();
        assert!(matches!(block, ContentBlock::Text { ref text } if text == "hello"));
    }

    #[test]
    fn unknown_content_block_tolerated() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type": "tool_use", "name": "Bash"}"#).unwrap();
        assert!(matches!(block, ContentBlock::Other));
    }

    #[test]
    fn usage_missing_fields_default_to_zero() {
        let usage: Usage = serde_json::from_str(r#"{"input_tokens": 12}"#).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.cache_read_input_tokens, 0);
    }
}
