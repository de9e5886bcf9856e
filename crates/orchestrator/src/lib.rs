//! Orchestration core: per-session agent actors, the persistent job queue,
//! transcription and knowledge-graph services, and the service container
//! that owns them all.
//!
//! The HTTP layer mounts on top of [`container::ServiceContainer`]; nothing
//! in this crate depends on a web framework.

pub mod actor;
pub mod container;
pub mod jobs;
pub mod kg;
pub mod sessions;
pub mod transcription;

pub use actor::{MessageResponse, MessageUsage, SessionActor};
pub use container::ServiceContainer;
pub use jobs::{CancelToken, Job, JobContext, JobHandler, JobQueue, JobState, JobType};
pub use sessions::{SessionService, SessionStatus};
pub use transcription::{TranscriptionService, Transcriber};

#[cfg(test)]
pub(crate) mod testkit;

#[cfg(test)]
mod scenarios;
