//! Wire types for the dwq job broker protocol: job descriptors, completion
//! notifications, and subjob announcements, plus the environment variable
//! names workers export to the commands they run.
//!
//! The on-the-wire field is `status_queues`, used both when a client submits
//! a job and when a worker reads where to publish its completion. The source
//! implementation wrote `status_queues` but read `control_queues`; this is
//! resolved here in favor of a single consistent name (see DESIGN.md).

mod env;
mod job;
mod result;

pub use env::EnvVar;
pub use job::{FileSpec, JobDirMode, JobOptions, JobSpec};
pub use result::{Completion, ControlMessage, JobResult, JobStatusValue, SubjobAnnouncement};

/// Placeholder substituted with a job's own id in its `status_queues` list,
/// enabling point-to-point replies.
pub const JOBID_PLACEHOLDER: &str = "$jobid";

/// Default number of NACKs a job tolerates before a failure becomes terminal.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Hard wall-clock timeout for a single command, in seconds.
pub const COMMAND_TIMEOUT_SECS: u64 = 300;
