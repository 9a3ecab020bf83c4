use anyhow::Result;
use dwq_base::{EnvVar, JobResult, JobSpec, JobStatusValue};
use dwq_broker::Job;
use slog::{info, warn, Logger};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{log_with_slot, WorkerContext, SLOT_RESTART_DELAY, SLOT_SHUTDOWN_POLL};

/// The body of one worker slot: `idle -> fetching -> validating -> preparing
/// -> running -> reporting -> idle`, restarting after a 10s cooldown if
/// anything below the per-job error handling bubbles up unhandled.
pub fn slot_loop(ctx: Arc<WorkerContext>, slot_index: usize) {
    let log = log_with_slot(&ctx.log, slot_index);
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = run_once(&ctx, slot_index, &log) {
            warn!(log, "worker slot error, restarting"; "error" => %e);
            thread::sleep(SLOT_RESTART_DELAY);
        }
    }
}

fn run_once(ctx: &WorkerContext, slot_index: usize, log: &Logger) -> Result<()> {
    if !ctx.broker.connected() {
        if ctx.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        thread::sleep(Duration::from_secs(1));
        let _ = ctx.broker.reconnect();
        return Ok(());
    }

    if ctx.paused.load(Ordering::SeqCst) {
        thread::sleep(SLOT_SHUTDOWN_POLL);
        return Ok(());
    }

    let jobs = Job::get(&ctx.broker, &ctx.queues, Some(Duration::from_secs(1)), Some(1), false)?;
    for job in jobs {
        process_job(ctx, slot_index, &job, log)?;
    }
    Ok(())
}

fn process_job(ctx: &WorkerContext, slot_index: usize, job: &Job, log: &Logger) -> Result<()> {
    if ctx.shutdown.load(Ordering::SeqCst) {
        job.nack(&ctx.broker)?;
        return Ok(());
    }

    if let Err(field_err) = job.spec.validate() {
        job.done(&ctx.broker, JobResult::error(field_err))?;
        return Ok(());
    }

    ctx.working_set.lock().unwrap().insert(job.job_id.clone());
    let result = run_job(ctx, slot_index, job, log);
    ctx.working_set.lock().unwrap().remove(&job.job_id);
    result
}

fn run_job(ctx: &WorkerContext, slot_index: usize, job: &Job, log: &Logger) -> Result<()> {
    let exclusive = job.spec.options.is_exclusive_jobdir();
    let lease_token = if exclusive {
        dwq_util::token::random_token()
    } else {
        format!("slot-{slot_index}")
    };
    let unique = dwq_util::token::random_token();

    let workdir = match ctx
        .gitjobdir
        .get(&job.spec.repo, &job.spec.commit, &lease_token, exclusive)
    {
        Ok(p) => p,
        Err(e) => {
            if should_retry(job.nacks, job.spec.options.max_retries) {
                job.nack(&ctx.broker)?;
            } else {
                job.done(&ctx.broker, JobResult::error(format!("checkout failed: {e:#}")))?;
            }
            return Ok(());
        }
    };

    let outcome = run_job_in_workdir(ctx, slot_index, job, &unique, &workdir, log);

    if let Err(e) = ctx.gitjobdir.release(&workdir) {
        warn!(log, "failed to release jobdir"; "path" => %workdir.display(), "error" => %e);
    }

    outcome
}

fn run_job_in_workdir(
    ctx: &WorkerContext,
    slot_index: usize,
    job: &Job,
    unique: &str,
    workdir: &Path,
    log: &Logger,
) -> Result<()> {
    let fs = dwq_util::fs::Fs::new();
    for file in &job.spec.options.files {
        let path = workdir.join(&file.path);
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)?;
        }
        let data = match file.decode() {
            Ok(d) => d,
            Err(e) => {
                job.done(
                    &ctx.broker,
                    JobResult::error(format!("bad file data for {}: {e}", file.path)),
                )?;
                return Ok(());
            }
        };
        fs.write(&path, &data)?;
        #[cfg(unix)]
        fs.set_mode(&path, file.mode)?;
    }

    let env = build_job_env(&job.spec, &job.queue_name, &job.job_id, &ctx.name, &ctx.buildnum, slot_index, unique);

    job.working(&ctx.broker)?;
    info!(log, "running job"; "job_id" => &job.job_id, "repo" => &job.spec.repo, "commit" => &job.spec.commit);

    let start = std::time::Instant::now();
    let handle = ctx.runner.spawn(&job.spec.command, workdir, &env)?;
    let outcome = handle.wait(Duration::from_secs(dwq_base::COMMAND_TIMEOUT_SECS), log)?;
    let runtime = start.elapsed().as_secs_f64();
    let output = String::from_utf8_lossy(&outcome.output).into_owned();

    let status = if outcome.timed_out {
        JobStatusValue::timeout()
    } else {
        match outcome.status {
            Some(code) => JobStatusValue::exit_code(code as i64),
            None => JobStatusValue::error(),
        }
    };

    if !status.is_success() && should_retry(job.nacks, job.spec.options.max_retries) {
        job.nack(&ctx.broker)?;
        return Ok(());
    }

    let result = JobResult {
        status,
        output,
        worker: Some(ctx.name.clone()),
        runtime: Some(runtime),
        body: Some(job.spec.clone()),
        unique: Some(unique.to_owned()),
    };
    job.done(&ctx.broker, result)?;
    Ok(())
}

/// Whether a job that has already been NACKed `nacks` times should go
/// around again rather than be reported as a terminal failure, per spec §7
/// ("retry then fail": exactly `max_retries` extra attempts before the
/// completion sticks).
fn should_retry(nacks: u32, max_retries: u32) -> bool {
    nacks < max_retries
}

/// Build the job-visible environment: the job's own `env` map overlaid with
/// the `DWQ_*` variables every job gets told about itself and its worker.
#[allow(clippy::too_many_arguments)]
fn build_job_env(
    spec: &JobSpec,
    queue_name: &str,
    job_id: &str,
    worker_name: &str,
    buildnum: &str,
    slot_index: usize,
    unique: &str,
) -> BTreeMap<String, String> {
    let mut env = spec.env.clone();
    env.insert(EnvVar::Repo.to_string(), spec.repo.clone());
    env.insert(EnvVar::Commit.to_string(), spec.commit.clone());
    env.insert(EnvVar::Queue.to_string(), queue_name.to_owned());
    env.insert(EnvVar::Worker.to_string(), worker_name.to_owned());
    env.insert(EnvVar::WorkerBuildnum.to_string(), buildnum.to_owned());
    env.insert(EnvVar::WorkerThread.to_string(), slot_index.to_string());
    env.insert(EnvVar::JobId.to_string(), job_id.to_owned());
    env.insert(EnvVar::JobUnique.to_string(), unique.to_owned());
    let control_queue = spec.status_queues.first().cloned().unwrap_or_default();
    env.insert(EnvVar::ControlQueue.to_string(), control_queue);
    env
}
