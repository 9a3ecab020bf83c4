use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::JOBID_PLACEHOLDER;

/// A job descriptor, as submitted by a client and read back by a worker.
///
/// `status_queues` is populated by the submitter (via [`JobSpec::with_status_queues`])
/// before the body is serialized; a worker reads `status_queues[0]` to
/// populate `DWQ_CONTROL_QUEUE`. See the module docs for why this crate uses
/// one field name where the original used two.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub repo: String,
    pub commit: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "JobOptions::is_default")]
    pub options: JobOptions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub status_queues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl JobSpec {
    pub fn new(repo: impl Into<String>, commit: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            commit: commit.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Mutates `status_queues` the way `Job.add` does on the Python side,
    /// before the body is handed off to the broker.
    pub fn with_status_queues(mut self, status_queues: Vec<String>) -> Self {
        self.status_queues = status_queues;
        self
    }

    /// Resolve `$jobid` against this job's own id, for one status queue entry.
    pub fn resolve_status_queue(queue: &str, job_id: &str) -> String {
        if queue == JOBID_PLACEHOLDER {
            job_id.to_owned()
        } else {
            queue.to_owned()
        }
    }

    /// Validate the required fields, per spec §4.4.b / §7.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.repo.is_empty() {
            return Err("missing 'repo'");
        }
        if self.commit.is_empty() {
            return Err("missing 'commit'");
        }
        if self.command.is_empty() {
            return Err("missing 'command'");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobDirMode {
    Exclusive,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobdir: Option<JobDirMode>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
}

fn default_max_retries() -> u32 {
    crate::DEFAULT_MAX_RETRIES
}

impl JobOptions {
    fn is_default(&self) -> bool {
        self.jobdir.is_none() && self.max_retries == crate::DEFAULT_MAX_RETRIES && self.files.is_empty()
    }

    pub fn is_exclusive_jobdir(&self) -> bool {
        matches!(self.jobdir, Some(JobDirMode::Exclusive))
    }
}

/// A file to materialize into a job's working directory before the command
/// runs, per spec §6 ("File packaging").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    pub mode: u32,
    pub data_b64: String,
}

impl FileSpec {
    pub fn from_bytes(path: impl Into<String>, mode: u32, data: &[u8]) -> Self {
        use base64::Engine as _;
        Self {
            path: path.into(),
            mode,
            data_b64: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.decode(&self.data_b64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_core_fields() {
        let spec = JobSpec::new("", "c", "echo hi");
        assert_eq!(spec.validate(), Err("missing 'repo'"));
        let spec = JobSpec::new("r", "", "echo hi");
        assert_eq!(spec.validate(), Err("missing 'commit'"));
        let spec = JobSpec::new("r", "c", "");
        assert_eq!(spec.validate(), Err("missing 'command'"));
        let spec = JobSpec::new("r", "c", "echo hi");
        assert_eq!(spec.validate(), Ok(()));
    }

    #[test]
    fn default_max_retries_round_trips() {
        let spec = JobSpec::new("r", "c", "echo hi");
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("max_retries"));
        let back: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.options.max_retries, 2);
    }

    #[test]
    fn jobid_placeholder_resolves() {
        assert_eq!(JobSpec::resolve_status_queue("$jobid", "abc123"), "abc123");
        assert_eq!(JobSpec::resolve_status_queue("other::queue", "abc123"), "other::queue");
    }

    #[test]
    fn file_spec_round_trips_through_base64() {
        let spec = FileSpec::from_bytes("a/b.txt", 0o644, b"hello");
        assert_eq!(spec.decode().unwrap(), b"hello");
    }

    #[test]
    fn env_field_round_trips() {
        use maplit::btreemap;
        let mut spec = JobSpec::new("r", "c", "echo hi");
        spec.env = btreemap! {
            "FOO".to_string() => "bar".to_string(),
            "BAZ".to_string() => "qux".to_string(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.env, spec.env);
    }
}
