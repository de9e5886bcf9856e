//! Crash-safe JSON persistence for the videoagent core.
//!
//! Every file write goes through write-to-temp-then-rename so readers never
//! observe a torn file. Mutations of the shared `metadata.json` (transcript
//! index, global cost) are serialized by a single in-process mutex.

pub mod atomic;
pub mod store;

pub use atomic::{atomic_write_json, atomic_write_json_with_mode, read_json};
pub use store::{
    is_valid_session_id, Message, MessageRole, Session, SessionSummary, SourceType,
    StorageManager, TranscriptMeta,
};
