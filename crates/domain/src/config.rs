//! Application configuration.
//!
//! Loaded from an optional TOML file, then overridden per-key by `APP_*`
//! environment variables. Every leaf has a compiled-in default so an empty
//! config is fully usable.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for all persistent state.
    #[serde(default = "d_data_path")]
    pub data_path: PathBuf,

    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Capacity of each session actor's bounded input queue.
    #[serde(default = "d_queue_max_size")]
    pub queue_max_size: usize,

    #[serde(default)]
    pub jobs: JobConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub kg: KgConfig,
    #[serde(default)]
    pub exports: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: d_data_path(),
            agent: AgentConfig::default(),
            timeouts: TimeoutConfig::default(),
            queue_max_size: d_queue_max_size(),
            jobs: JobConfig::default(),
            audit: AuditConfig::default(),
            kg: KgConfig::default(),
            exports: ExportConfig::default(),
        }
    }
}

fn d_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn d_queue_max_size() -> usize {
    10
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upstream model identifier.
    #[serde(default = "d_model")]
    pub model: String,

    /// Hard cap on agentic turns per request.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,

    /// Environment variable holding the upstream API credential.
    /// Session creation fails with SERVICE_UNAVAILABLE when unset.
    #[serde(default = "d_credential_env")]
    pub credential_env: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            max_turns: d_max_turns(),
            credential_env: d_credential_env(),
        }
    }
}

fn d_model() -> String {
    "claude-opus-4-5".into()
}

fn d_max_turns() -> u32 {
    50
}

fn d_credential_env() -> String {
    "ANTHROPIC_API_KEY".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Outer bound on one user turn (seconds).
    #[serde(default = "d_response_timeout")]
    pub response_timeout_secs: u64,

    /// Bound on the initial greeting (seconds).
    #[serde(default = "d_greeting_timeout")]
    pub greeting_timeout_secs: u64,

    /// Idle TTL after which a session is cleaned up (seconds).
    #[serde(default = "d_session_ttl")]
    pub session_ttl_secs: u64,

    /// Period of the session cleanup sweep (seconds).
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Grace given to a worker on stop before it is force-cancelled.
    #[serde(default = "d_graceful_shutdown")]
    pub graceful_shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: d_response_timeout(),
            greeting_timeout_secs: d_greeting_timeout(),
            session_ttl_secs: d_session_ttl(),
            cleanup_interval_secs: d_cleanup_interval(),
            graceful_shutdown_secs: d_graceful_shutdown(),
        }
    }
}

fn d_response_timeout() -> u64 {
    300
}

fn d_greeting_timeout() -> u64 {
    30
}

fn d_session_ttl() -> u64 {
    3600
}

fn d_cleanup_interval() -> u64 {
    300
}

fn d_graceful_shutdown() -> u64 {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Size of the background job worker pool. Clamped to `1..=8`.
    #[serde(default = "d_job_max_concurrent")]
    pub max_concurrent: usize,

    /// How often idle workers poll the queue for pending jobs.
    #[serde(default = "d_job_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_job_max_concurrent(),
            poll_interval_ms: d_job_poll_interval_ms(),
        }
    }
}

impl JobConfig {
    /// Clamp `max_concurrent` to the allowed range `1..=8`.
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent: self.max_concurrent.clamp(1, 8),
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

fn d_job_max_concurrent() -> usize {
    2
}

fn d_job_poll_interval_ms() -> u64 {
    1000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Audit log retention window in hours.
    #[serde(default = "d_audit_retention_hours")]
    pub retention_hours: u64,

    /// Hard cap on retained events per session.
    #[serde(default = "d_audit_max_events")]
    pub max_events_per_session: usize,

    /// Number of session event lists held in the in-memory LRU cache.
    #[serde(default = "d_audit_cache_max")]
    pub cache_max_sessions: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_hours: d_audit_retention_hours(),
            max_events_per_session: d_audit_max_events(),
            cache_max_sessions: d_audit_cache_max(),
        }
    }
}

fn d_audit_retention_hours() -> u64 {
    168
}

fn d_audit_max_events() -> usize {
    10_000
}

fn d_audit_cache_max() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge graph & exports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KgConfig {
    #[serde(default = "d_true")]
    pub entity_resolution_enabled: bool,
}

impl Default for KgConfig {
    fn default() -> Self {
        Self {
            entity_resolution_enabled: d_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Exports older than this are swept from `exports/`.
    #[serde(default = "d_export_ttl_hours")]
    pub ttl_hours: u64,

    /// Maximum projects accepted in one batch export request.
    #[serde(default = "d_batch_export_max")]
    pub batch_max_projects: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ttl_hours: d_export_ttl_hours(),
            batch_max_projects: d_batch_export_max(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_export_ttl_hours() -> u64 {
    24
}

fn d_batch_export_max() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Load configuration: TOML file (when present) plus `APP_*` env
    /// overrides applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| Error::Config(format!("{p:?}: {e}")))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `APP_*` environment overrides. Unparsable values are ignored
    /// with a warning rather than failing startup.
    pub fn apply_env_overrides(&mut self) {
        override_string("APP_DATA_PATH", |v| self.data_path = PathBuf::from(v));
        override_string("APP_CLAUDE_MODEL", |v| self.agent.model = v);
        override_string("APP_CREDENTIAL_ENV", |v| self.agent.credential_env = v);
        override_parse("APP_MAX_TURNS", |v| self.agent.max_turns = v);

        override_parse("APP_RESPONSE_TIMEOUT", |v| {
            self.timeouts.response_timeout_secs = v;
        });
        override_parse("APP_GREETING_TIMEOUT", |v| {
            self.timeouts.greeting_timeout_secs = v;
        });
        override_parse("APP_SESSION_TTL", |v| self.timeouts.session_ttl_secs = v);
        override_parse("APP_CLEANUP_INTERVAL", |v| {
            self.timeouts.cleanup_interval_secs = v;
        });
        override_parse("APP_GRACEFUL_SHUTDOWN_TIMEOUT", |v| {
            self.timeouts.graceful_shutdown_secs = v;
        });

        override_parse("APP_QUEUE_MAX_SIZE", |v| self.queue_max_size = v);

        override_parse("APP_JOB_MAX_CONCURRENT", |v| self.jobs.max_concurrent = v);
        override_parse("APP_JOB_POLL_INTERVAL_MS", |v| {
            self.jobs.poll_interval_ms = v;
        });

        override_parse("APP_AUDIT_RETENTION_HOURS", |v| {
            self.audit.retention_hours = v;
        });
        override_parse("APP_AUDIT_MAX_EVENTS_PER_SESSION", |v| {
            self.audit.max_events_per_session = v;
        });
        override_parse("APP_AUDIT_CACHE_MAX_SESSIONS", |v| {
            self.audit.cache_max_sessions = v;
        });

        override_parse("APP_ENTITY_RESOLUTION_ENABLED", |v| {
            self.kg.entity_resolution_enabled = v;
        });
        override_parse("APP_EXPORT_TTL_HOURS", |v| self.exports.ttl_hours = v);
        override_parse("APP_BATCH_EXPORT_MAX_PROJECTS", |v| {
            self.exports.batch_max_projects = v;
        });
    }
}

fn override_string(key: &str, apply: impl FnOnce(String)) {
    if let Ok(val) = std::env::var(key) {
        if !val.is_empty() {
            apply(val);
        }
    }
}

fn override_parse<T: std::str::FromStr>(key: &str, apply: impl FnOnce(T)) {
    if let Ok(val) = std::env::var(key) {
        match val.parse::<T>() {
            Ok(parsed) => apply(parsed),
            Err(_) => {
                tracing::warn!(key, value = %val, "ignoring unparsable env override");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.agent.model.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agent.model".into(),
                message: "model must not be empty".into(),
            });
        }

        if self.timeouts.response_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "timeouts.response_timeout_secs".into(),
                message: "response timeout must be greater than 0".into(),
            });
        }

        if self.timeouts.greeting_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "timeouts.greeting_timeout_secs".into(),
                message: "greeting timeout must be greater than 0".into(),
            });
        }

        if self.queue_max_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "queue_max_size".into(),
                message: "queue size must be at least 1".into(),
            });
        }

        if self.jobs.max_concurrent != self.jobs.clamped().max_concurrent {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "jobs.max_concurrent".into(),
                message: format!(
                    "{} is outside 1..=8 and will be clamped",
                    self.jobs.max_concurrent
                ),
            });
        }

        if self.audit.retention_hours == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "audit.retention_hours".into(),
                message: "retention must be at least 1 hour".into(),
            });
        }

        if self.audit.max_events_per_session < 2 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "audit.max_events_per_session".into(),
                message: "per-session event cap must be at least 2".into(),
            });
        }

        if self.audit.cache_max_sessions == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "audit.cache_max_sessions".into(),
                message: "cache size must be at least 1".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
