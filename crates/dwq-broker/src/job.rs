//! The `Job` type ties a raw broker job together with its decoded
//! [`dwq_base::JobSpec`] body and the broker operations that act on it.

use anyhow::{Context as _, Result};
use dwq_base::{JobResult, JobSpec};

use crate::connection::{BrokerContext, GetJobOpts, RawJob};

#[derive(Clone, Debug)]
pub struct Job {
    pub queue_name: String,
    pub job_id: String,
    pub spec: JobSpec,
    pub nacks: u32,
    pub additional_deliveries: u32,
}

impl Job {
    /// Fetch up to `count` jobs off `queues`, decoding each body. A job whose
    /// body fails to deserialize is dropped with a broker-side NACK rather
    /// than handed to the caller, since there's nothing a worker can do with
    /// a spec it can't parse.
    pub fn get(
        broker: &BrokerContext,
        queues: &[String],
        timeout: Option<std::time::Duration>,
        count: Option<usize>,
        nohang: bool,
    ) -> Result<Vec<Job>> {
        let raw = broker.get_job(
            queues,
            GetJobOpts {
                timeout,
                count,
                nohang,
            },
        )?;
        let mut jobs = Vec::with_capacity(raw.len());
        for RawJob {
            queue_name,
            job_id,
            body,
            nacks,
            additional_deliveries,
        } in raw
        {
            match serde_json::from_slice::<JobSpec>(&body) {
                Ok(spec) => jobs.push(Job {
                    queue_name,
                    job_id,
                    spec,
                    nacks,
                    additional_deliveries,
                }),
                Err(_) => {
                    let _ = broker.nack(&job_id);
                }
            }
        }
        Ok(jobs)
    }

    /// Tell the broker this job is still being worked, resetting its
    /// visibility timeout.
    pub fn working(&self, broker: &BrokerContext) -> Result<()> {
        broker.working(&self.job_id)
    }

    /// Publish one completion per entry in `status_queues` (substituting
    /// `$jobid` for this job's own id) and ACK the job.
    pub fn done(&self, broker: &BrokerContext, result: JobResult) -> Result<()> {
        let completion = dwq_base::Completion::done(self.job_id.clone(), result);
        let body = serde_json::to_vec(&completion).context("serializing completion")?;
        for queue in &self.spec.status_queues {
            let resolved = JobSpec::resolve_status_queue(queue, &self.job_id);
            broker
                .add_job(&resolved, &body, 60_000, Some(0))
                .with_context(|| format!("publishing completion to {resolved}"))?;
        }
        broker.ack(&self.job_id)
    }

    pub fn nack(&self, broker: &BrokerContext) -> Result<()> {
        broker.nack(&self.job_id)
    }

    /// Remove this job from the broker outright, used when a client cancels
    /// a still-queued job.
    pub fn cancel(&self, broker: &BrokerContext) -> Result<()> {
        broker.del(&[self.job_id.clone()])
    }

    /// Submit `spec` to `queue`, stamping `status_queues` on it first, and
    /// return the new job id.
    pub fn add(
        broker: &BrokerContext,
        queue: &str,
        spec: JobSpec,
        status_queues: Vec<String>,
        timeout_ms: u64,
        max_retries: Option<u32>,
    ) -> Result<String> {
        let spec = spec.with_status_queues(status_queues);
        let body = serde_json::to_vec(&spec).context("serializing job spec")?;
        broker.add_job(queue, &body, timeout_ms, max_retries)
    }

    /// Remove a batch of still-queued jobs, best-effort: a missing id is not
    /// an error, since the client may race a worker that's already ACKed it.
    pub fn cancel_all(broker: &BrokerContext, ids: &[String]) -> Result<()> {
        broker.del(ids)
    }

    /// Drain up to `count` messages off `queue`, fast-ACKing each (so the
    /// broker never retains or redelivers it) and returning the raw bodies
    /// for the caller to interpret. `timeout` bounds a single call; `None`
    /// blocks until the broker's own default takes over. Used by the
    /// client's control-queue loop, which passes a short timeout and loops
    /// so it can notice a shutdown signal between calls.
    pub fn wait(
        broker: &BrokerContext,
        queue: &str,
        count: usize,
        timeout: Option<std::time::Duration>,
    ) -> Result<Vec<Vec<u8>>> {
        let raw = broker.get_job(
            std::slice::from_ref(&queue.to_owned()),
            GetJobOpts {
                timeout,
                count: Some(count),
                nohang: false,
            },
        )?;
        let ids: Vec<String> = raw.iter().map(|j| j.job_id.clone()).collect();
        broker.fast_ack(&ids)?;
        Ok(raw.into_iter().map(|j| j.body).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_stamps_status_queues_before_serializing() {
        let spec = JobSpec::new("repo", "deadbeef", "echo hi");
        let stamped = spec.with_status_queues(vec!["ctl::1".to_owned()]);
        assert_eq!(stamped.status_queues, vec!["ctl::1".to_owned()]);
    }

    #[test]
    fn add_stamps_status_queues_onto_a_populated_env() {
        use maplit::btreemap;
        let mut spec = JobSpec::new("repo", "deadbeef", "echo hi");
        spec.env = btreemap! { "STAGE".to_string() => "ci".to_string() };
        let stamped = spec.with_status_queues(vec!["ctl::1".to_owned()]);
        assert_eq!(stamped.env.get("STAGE"), Some(&"ci".to_string()));
        assert_eq!(stamped.status_queues, vec!["ctl::1".to_owned()]);
    }
}
