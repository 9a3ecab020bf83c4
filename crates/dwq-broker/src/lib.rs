//! Adapter over the external Disque-compatible job broker. Disque speaks the
//! Redis RESP protocol and exposes its job-queue primitives (`ADDJOB`,
//! `GETJOB`, `ACKJOB`, `FASTACK`, `NACK`, `DELJOB`, `WORKING`, `QSTAT`) as
//! ordinary commands, so this crate drives them through `redis::Cmd` rather
//! than pulling in a Disque-specific client crate (none of substance exists
//! on crates.io; see DESIGN.md).

mod connection;
mod job;
mod qstat;

pub use connection::{BrokerContext, GetJobOpts, RawJob};
pub use job::Job;
pub use qstat::QueueStats;
