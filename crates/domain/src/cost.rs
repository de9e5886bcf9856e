//! Cost accounting for agent sessions.
//!
//! Token counters are accumulated per message with dedup by message ID
//! (the upstream SDK may re-deliver a message on stream restart). The
//! dollar figure is never computed locally: the SDK reports a cumulative
//! `total_cost_usd` on every result message and the latest value wins.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-message usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage reported for a single upstream message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageData {
    /// Unique message identifier used for deduplication.
    pub message_id: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session cost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cumulative usage for one session, idempotent under message replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCost {
    pub session_id: String,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cache_creation_tokens: u64,
    #[serde(default)]
    pub total_cache_read_tokens: u64,
    /// Latest SDK-reported cumulative session cost (overwrite, not sum).
    #[serde(rename = "total_cost_usd", default)]
    pub reported_cost_usd: f64,
    #[serde(rename = "processed_message_ids", default)]
    pub processed_ids: HashSet<String>,
}

impl SessionCost {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cache_creation_tokens: 0,
            total_cache_read_tokens: 0,
            reported_cost_usd: 0.0,
            processed_ids: HashSet::new(),
        }
    }

    /// Add per-message usage. Returns `false` (no-op) when the message ID
    /// was already processed.
    pub fn add_usage(&mut self, usage: &UsageData) -> bool {
        if !self.processed_ids.insert(usage.message_id.clone()) {
            return false;
        }
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_cache_creation_tokens += usage.cache_creation_input_tokens;
        self.total_cache_read_tokens += usage.cache_read_input_tokens;
        true
    }

    /// Overwrite the SDK-reported cumulative session cost with the latest
    /// value from a result message.
    pub fn set_reported_cost(&mut self, cost_usd: f64) {
        self.reported_cost_usd = cost_usd;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Global cost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate usage across all sessions, held in `metadata.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalCost {
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cache_creation_tokens: u64,
    #[serde(default)]
    pub total_cache_read_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub session_count: u64,
}

impl GlobalCost {
    /// Fold a finished session's cost into the global totals.
    pub fn absorb(&mut self, session: &SessionCost) {
        self.total_input_tokens += session.total_input_tokens;
        self.total_output_tokens += session.total_output_tokens;
        self.total_cache_creation_tokens += session.total_cache_creation_tokens;
        self.total_cache_read_tokens += session.total_cache_read_tokens;
        self.total_cost_usd += session.reported_cost_usd;
        self.session_count += 1;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(id: &str, input: u64, output: u64) -> UsageData {
        UsageData {
            message_id: id.into(),
            input_tokens: input,
            output_tokens: output,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    // ── add_usage dedup ─────────────────────────────────────────────

    #[test]
    fn add_usage_accumulates() {
        let mut cost = SessionCost::new("s1");
        assert!(cost.add_usage(&usage("m1", 100, 50)));
        assert!(cost.add_usage(&usage("m2", 200, 75)));
        assert_eq!(cost.total_input_tokens, 300);
        assert_eq!(cost.total_output_tokens, 125);
    }

    #[test]
    fn add_usage_is_idempotent_per_message_id() {
        let mut cost = SessionCost::new("s1");
        assert!(cost.add_usage(&usage("m1", 100, 50)));
        // Same ID replayed — must be a no-op even with different numbers.
        assert!(!cost.add_usage(&usage("m1", 999, 999)));
        assert_eq!(cost.total_input_tokens, 100);
        assert_eq!(cost.total_output_tokens, 50);
    }

    #[test]
    fn replayed_stream_equals_distinct_set() {
        // Totals under replay equal totals over the distinct ID set.
        let stream = [
            usage("a", 10, 1),
            usage("b", 20, 2),
            usage("a", 10, 1),
            usage("c", 30, 3),
            usage("b", 20, 2),
        ];
        let mut replayed = SessionCost::new("s1");
        for u in &stream {
            replayed.add_usage(u);
        }

        let mut distinct = SessionCost::new("s1");
        for u in [&stream[0], &stream[1], &stream[3]] {
            distinct.add_usage(u);
        }

        assert_eq!(replayed.total_input_tokens, distinct.total_input_tokens);
        assert_eq!(replayed.total_output_tokens, distinct.total_output_tokens);
        assert_eq!(replayed.total_input_tokens, 60);
    }

    #[test]
    fn cache_tokens_tracked() {
        let mut cost = SessionCost::new("s1");
        cost.add_usage(&UsageData {
            message_id: "m1".into(),
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_input_tokens: 500,
            cache_read_input_tokens: 1200,
        });
        assert_eq!(cost.total_cache_creation_tokens, 500);
        assert_eq!(cost.total_cache_read_tokens, 1200);
    }

    // ── reported cost ───────────────────────────────────────────────

    #[test]
    fn reported_cost_overwrites_not_sums() {
        let mut cost = SessionCost::new("s1");
        cost.set_reported_cost(0.05);
        cost.set_reported_cost(0.12);
        // Latest cumulative value wins.
        assert!((cost.reported_cost_usd - 0.12).abs() < f64::EPSILON);
    }

    // ── serde shape ─────────────────────────────────────────────────

    #[test]
    fn session_cost_serde_shape() {
        let mut cost = SessionCost::new("s1");
        cost.add_usage(&usage("m1", 10, 5));
        cost.set_reported_cost(0.01);

        let value = serde_json::to_value(&cost).unwrap();
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["total_input_tokens"], 10);
        assert!((value["total_cost_usd"].as_f64().unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(value["processed_message_ids"].as_array().unwrap().len(), 1);

        let back: SessionCost = serde_json::from_value(value).unwrap();
        assert_eq!(back.total_input_tokens, 10);
        assert!(back.processed_ids.contains("m1"));
        // Replay after round-trip stays deduplicated.
        let mut back = back;
        assert!(!back.add_usage(&usage("m1", 10, 5)));
    }

    // ── global cost ─────────────────────────────────────────────────

    #[test]
    fn absorb_accumulates_and_counts_sessions() {
        let mut s1 = SessionCost::new("s1");
        s1.add_usage(&usage("m1", 100, 10));
        s1.set_reported_cost(0.25);

        let mut s2 = SessionCost::new("s2");
        s2.add_usage(&usage("m2", 200, 20));
        s2.set_reported_cost(0.50);

        let mut global = GlobalCost::default();
        global.absorb(&s1);
        global.absorb(&s2);

        assert_eq!(global.total_input_tokens, 300);
        assert_eq!(global.total_output_tokens, 30);
        assert!((global.total_cost_usd - 0.75).abs() < 1e-12);
        assert_eq!(global.session_count, 2);
    }

    #[test]
    fn absorb_is_additive_per_field() {
        // absorb(x); absorb(y) == one absorb with summed deltas, per field.
        let mut a = SessionCost::new("a");
        a.add_usage(&usage("m1", 7, 3));
        a.set_reported_cost(0.1);
        let mut b = SessionCost::new("b");
        b.add_usage(&usage("m2", 11, 5));
        b.set_reported_cost(0.2);

        let mut sequential = GlobalCost::default();
        sequential.absorb(&a);
        sequential.absorb(&b);

        let mut combined = SessionCost::new("ab");
        combined.add_usage(&usage("m1", 7, 3));
        combined.add_usage(&usage("m2", 11, 5));
        combined.set_reported_cost(0.1 + 0.2);
        let mut at_once = GlobalCost::default();
        at_once.absorb(&combined);

        assert_eq!(sequential.total_input_tokens, at_once.total_input_tokens);
        assert_eq!(sequential.total_output_tokens, at_once.total_output_tokens);
        assert!((sequential.total_cost_usd - at_once.total_cost_usd).abs() < 1e-12);
    }
}
