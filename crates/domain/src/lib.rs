//! Shared types for the videoagent orchestration core.
//!
//! Everything the other crates agree on lives here: the error taxonomy and
//! API error envelope, configuration, cost accounting types, and the audit
//! event model.

pub mod audit;
pub mod config;
pub mod cost;
pub mod error;

pub use config::Config;
pub use cost::{GlobalCost, SessionCost, UsageData};
pub use error::{ApiError, Error, ErrorCode, Result};
