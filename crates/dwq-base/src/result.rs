use serde::{Deserialize, Serialize};

use crate::JobSpec;

/// The status of a finished job. Accepts the integer `0`, the strings `"0"`
/// and `"pass"` as success, the sentinel `"timeout"`, and `"error"`, plus any
/// other command-supplied exit status, mirroring the Python source's loose
/// `{0, "0", "pass"}` success check (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobStatusValue {
    Int(i64),
    Str(String),
}

impl JobStatusValue {
    pub fn is_success(&self) -> bool {
        match self {
            JobStatusValue::Int(0) => true,
            JobStatusValue::Str(s) => s == "0" || s == "pass",
            _ => false,
        }
    }

    pub fn timeout() -> Self {
        JobStatusValue::Str("timeout".to_owned())
    }

    pub fn error() -> Self {
        JobStatusValue::Str("error".to_owned())
    }

    pub fn canceled() -> Self {
        JobStatusValue::Str("canceled".to_owned())
    }

    pub fn exit_code(code: i64) -> Self {
        JobStatusValue::Int(code)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatusValue,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JobSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<String>,
}

impl JobResult {
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: JobStatusValue::error(),
            output: output.into(),
            worker: None,
            runtime: None,
            body: None,
            unique: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    pub job_id: String,
    pub state: String,
    pub result: JobResult,
}

impl Completion {
    pub fn done(job_id: impl Into<String>, result: JobResult) -> Self {
        Self {
            job_id: job_id.into(),
            state: "done".to_owned(),
            result,
        }
    }
}

/// Published to a parent job's control queue when one of its subjobs is
/// enqueued (spec §3 "Subjob announcement").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjobAnnouncement {
    pub parent: String,
    pub subjob: String,
    pub unique: String,
}

/// A message read off a client's control queue: either a subjob announcement
/// or a completion notification. The two shapes are disambiguated by the
/// presence of `subjob`, matching the Python source's `job.get("subjob")`
/// check.
#[derive(Clone, Debug)]
pub enum ControlMessage {
    Subjob(SubjobAnnouncement),
    Completion(Completion),
}

impl ControlMessage {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        if value.get("subjob").is_some() {
            Ok(ControlMessage::Subjob(serde_json::from_value(value)?))
        } else {
            Ok(ControlMessage::Completion(serde_json::from_value(value)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_predicate_matches_spec() {
        assert!(JobStatusValue::Int(0).is_success());
        assert!(JobStatusValue::Str("0".into()).is_success());
        assert!(JobStatusValue::Str("pass".into()).is_success());
        assert!(!JobStatusValue::Int(1).is_success());
        assert!(!JobStatusValue::timeout().is_success());
        assert!(!JobStatusValue::error().is_success());
    }

    #[test]
    fn control_message_disambiguates_on_subjob_key() {
        let sub = serde_json::json!({"parent": "p1", "subjob": "s1", "unique": "u1"});
        match ControlMessage::from_json(sub.to_string().as_bytes()).unwrap() {
            ControlMessage::Subjob(a) => {
                assert_eq!(a.parent, "p1");
                assert_eq!(a.subjob, "s1");
            }
            ControlMessage::Completion(_) => panic!("expected subjob"),
        }

        let done = serde_json::json!({
            "job_id": "j1",
            "state": "done",
            "result": {"status": 0, "output": "hi\n", "unique": "u1"},
        });
        match ControlMessage::from_json(done.to_string().as_bytes()).unwrap() {
            ControlMessage::Completion(c) => assert_eq!(c.job_id, "j1"),
            ControlMessage::Subjob(_) => panic!("expected completion"),
        }
    }
}
