use std::fmt;

/// Environment variables a worker exports to the command it runs, mandatory
/// per spec §4.4.e on top of whatever the job body's `env` map supplies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvVar {
    Repo,
    Commit,
    Queue,
    Worker,
    WorkerBuildnum,
    WorkerThread,
    JobId,
    JobUnique,
    ControlQueue,
}

impl EnvVar {
    pub const ALL: [EnvVar; 9] = [
        EnvVar::Repo,
        EnvVar::Commit,
        EnvVar::Queue,
        EnvVar::Worker,
        EnvVar::WorkerBuildnum,
        EnvVar::WorkerThread,
        EnvVar::JobId,
        EnvVar::JobUnique,
        EnvVar::ControlQueue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnvVar::Repo => "DWQ_REPO",
            EnvVar::Commit => "DWQ_COMMIT",
            EnvVar::Queue => "DWQ_QUEUE",
            EnvVar::Worker => "DWQ_WORKER",
            EnvVar::WorkerBuildnum => "DWQ_WORKER_BUILDNUM",
            EnvVar::WorkerThread => "DWQ_WORKER_THREAD",
            EnvVar::JobId => "DWQ_JOBID",
            EnvVar::JobUnique => "DWQ_JOB_UNIQUE",
            EnvVar::ControlQueue => "DWQ_CONTROL_QUEUE",
        }
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_variant() {
        assert_eq!(EnvVar::ALL.len(), 9);
        assert_eq!(EnvVar::ControlQueue.as_str(), "DWQ_CONTROL_QUEUE");
    }
}
