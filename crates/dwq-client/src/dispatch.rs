//! Submission and completion-collection for `dwqc`, mirroring the original
//! tool's job set/`subjobs`/`unexpected` bookkeeping (spec §4.5).

use anyhow::{bail, Context as _, Result};
use dwq_base::{Completion, ControlMessage, JobOptions, JobResult, JobSpec};
use dwq_broker::{BrokerContext, Job};
use slog::{info, o, warn, Logger};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{BufRead as _, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::Cli;
use crate::filedata::{gen_file_data, resolve_env};
use crate::nicetime::nicetime;

const ADD_TIMEOUT_MS: u64 = 3600_000;
const WAIT_POLL: Duration = Duration::from_millis(500);
const WAIT_COUNT: usize = 128;

pub fn run(cli: Cli, log: Logger, shutdown: Arc<AtomicBool>) -> Result<bool> {
    let broker = BrokerContext::connect(&[cli.broker.clone()], &log)?;
    let files = gen_file_data(&cli.file).context("processing --file argument")?;
    let env = resolve_env(&cli.env);

    let (control_queue, parent_job_id, parent_unique) = if cli.subjob {
        let control_queue = std::env::var("DWQ_CONTROL_QUEUE")
            .context("--subjob specified, but DWQ_CONTROL_QUEUE unset")?;
        let parent_job_id =
            std::env::var("DWQ_JOBID").context("--subjob specified, but DWQ_JOBID unset")?;
        let parent_unique = std::env::var("DWQ_JOB_UNIQUE").unwrap_or_default();
        (control_queue, Some(parent_job_id), parent_unique)
    } else {
        (format!("control::{}", dwq_util::token::random_token()), None, String::new())
    };

    let start_time = Instant::now();
    if let Some(report) = &cli.report {
        publish_report(&broker, report, serde_json::json!({"status": "collecting jobs"}))?;
    }

    let mut outstanding = HashSet::new();
    submit_all(
        &cli,
        &broker,
        &control_queue,
        parent_job_id.as_deref(),
        &parent_unique,
        &files,
        &env,
        &log,
        &mut outstanding,
    )?;

    if cli.subjob {
        if let Some(report) = &cli.report {
            publish_report(&broker, report, serde_json::json!({"status": "done"}))?;
        }
        return Ok(true);
    }

    collect(&cli, &broker, &control_queue, outstanding, start_time, &log, &shutdown)
}

#[allow(clippy::too_many_arguments)]
fn submit_all(
    cli: &Cli,
    broker: &BrokerContext,
    control_queue: &str,
    parent_job_id: Option<&str>,
    parent_unique: &str,
    files: &[dwq_base::FileSpec],
    env: &BTreeMap<String, String>,
    log: &Logger,
    outstanding: &mut HashSet<String>,
) -> Result<()> {
    let mut batch = Vec::new();

    let mut submit_one = |command: String, options_override: Option<&str>| -> Result<()> {
        let options = build_options(cli.exclusive_jobdir, files, options_override)?;
        let mut spec = JobSpec::new(&cli.repo, &cli.commit, command);
        spec.options = options;
        spec.env = env.clone();
        if let Some(parent) = parent_job_id {
            spec.parent = Some(parent.to_owned());
        }
        if cli.batch {
            batch.push(spec);
        } else {
            let id = queue_job(broker, &cli.queue, spec, vec![control_queue.to_owned()], parent_unique)?;
            if parent_job_id.is_none() {
                outstanding.insert(id.clone());
            }
            info!(log, "job sent"; "job_id" => &id);
        }
        Ok(())
    };

    match &cli.command {
        Some(command) if !cli.stdin => submit_one(command.clone(), None)?,
        _ => {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.context("reading stdin")?;
                let (command_part, override_json) = match line.split_once("###") {
                    Some((cmd, rest)) => (cmd, Some(rest)),
                    None => (line.as_str(), None),
                };
                let command = match &cli.command {
                    Some(template) if cli.stdin => apply_placeholders(template, command_part),
                    _ => command_part.to_owned(),
                };
                submit_one(command, override_json)?;
            }
        }
    }

    for spec in batch {
        let id = queue_job(broker, &cli.queue, spec, vec![control_queue.to_owned()], parent_unique)?;
        if parent_job_id.is_none() {
            outstanding.insert(id.clone());
        }
        info!(log, "job sent"; "job_id" => &id);
    }

    Ok(())
}

fn apply_placeholders(template: &str, line: &str) -> String {
    let mut command = template.to_owned();
    for (i, arg) in line.split(' ').enumerate() {
        command = command.replace(&format!("${{{}}}", i + 1), arg);
    }
    command
}

fn build_options(
    exclusive_jobdir: bool,
    files: &[dwq_base::FileSpec],
    override_json: Option<&str>,
) -> Result<JobOptions> {
    let mut value = serde_json::json!({});
    if exclusive_jobdir {
        value["jobdir"] = serde_json::json!("exclusive");
    }
    if !files.is_empty() {
        value["files"] = serde_json::to_value(files)?;
    }
    if let Some(raw) = override_json {
        let over: serde_json::Value =
            serde_json::from_str(raw).context("parsing ### options override")?;
        if let (Some(obj), Some(over_obj)) = (value.as_object_mut(), over.as_object()) {
            for (k, v) in over_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
    serde_json::from_value(value).context("building job options")
}

/// Submit `spec` and, if it's a subjob (has a `parent`), publish the
/// announcement linking it back to the spawning job's `unique` token.
fn queue_job(
    broker: &BrokerContext,
    queue: &str,
    spec: JobSpec,
    status_queues: Vec<String>,
    unique: &str,
) -> Result<String> {
    let parent = spec.parent.clone();
    let job_id = Job::add(broker, queue, spec, status_queues.clone(), ADD_TIMEOUT_MS, None)?;
    if let Some(parent) = parent {
        let announcement = dwq_base::SubjobAnnouncement {
            parent,
            subjob: job_id.clone(),
            unique: unique.to_owned(),
        };
        let body = serde_json::to_vec(&announcement)?;
        broker.add_job(&status_queues[0], &body, ADD_TIMEOUT_MS, None)?;
    }
    Ok(job_id)
}

fn publish_report(broker: &BrokerContext, queue: &str, value: serde_json::Value) -> Result<()> {
    let body = serde_json::to_vec(&value)?;
    broker.add_job(queue, &body, ADD_TIMEOUT_MS, None)?;
    Ok(())
}

/// Block until a message arrives on `queue` or `shutdown` is flagged,
/// polling `Job::wait` in short bursts so SIGINT/SIGTERM are noticed
/// promptly instead of blocking forever inside one broker call.
fn wait_for_messages(
    broker: &BrokerContext,
    queue: &str,
    count: usize,
    shutdown: &AtomicBool,
) -> Result<Vec<Vec<u8>>> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let bodies = Job::wait(broker, queue, count, Some(WAIT_POLL))?;
        if !bodies.is_empty() {
            return Ok(bodies);
        }
    }
}

/// The outstanding/subjobs/unexpected/early bookkeeping `collect` folds
/// every control message into, independent of where those messages come
/// from (a live broker, or a canned list in a test).
struct ReconcileState {
    outstanding: HashSet<String>,
    subjobs: HashMap<String, HashMap<String, HashSet<String>>>,
    unexpected: HashMap<String, Completion>,
    early: VecDeque<Completion>,
    total: usize,
}

impl ReconcileState {
    fn new(outstanding: HashSet<String>) -> Self {
        let total = outstanding.len();
        Self {
            outstanding,
            subjobs: HashMap::new(),
            unexpected: HashMap::new(),
            early: VecDeque::new(),
            total,
        }
    }
}

/// Fold one control message into `state`. A subjob announcement just
/// records the parent/unique -> subjob-id link. A completion either
/// resolves a job `state` is waiting on (returned here for the caller to
/// report), or, if it names a job nobody announced yet, parks in
/// `unexpected` until the matching announcement arrives (spec scenario 5:
/// out-of-order subjob completion).
///
/// When a completion resolves a job, any of its subjobs already parked in
/// `unexpected` move to `early` so the next drain picks them up ahead of
/// waiting on the broker again, and `state.total` grows by the fan-out
/// count (spec scenario 4: subjob fan-out).
fn reconcile(state: &mut ReconcileState, msg: ControlMessage) -> Option<Completion> {
    match msg {
        ControlMessage::Subjob(ann) => {
            state
                .subjobs
                .entry(ann.parent)
                .or_default()
                .entry(ann.unique)
                .or_default()
                .insert(ann.subjob);
            None
        }
        ControlMessage::Completion(completion) => {
            if !state.outstanding.remove(&completion.job_id) {
                state.unexpected.insert(completion.job_id.clone(), completion);
                return None;
            }

            let unique = completion.result.unique.clone().unwrap_or_default();
            if let Some(subs) = state.subjobs.get(&completion.job_id).and_then(|m| m.get(&unique)) {
                for subjob_id in subs {
                    if let Some(parked) = state.unexpected.remove(subjob_id) {
                        state.early.push_back(parked);
                    }
                    state.outstanding.insert(subjob_id.clone());
                }
                state.total += subs.len();
            }

            Some(completion)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn collect(
    cli: &Cli,
    broker: &BrokerContext,
    control_queue: &str,
    outstanding: HashSet<String>,
    start_time: Instant,
    log: &Logger,
    shutdown: &AtomicBool,
) -> Result<bool> {
    let log = log.new(o!("component" => "collect"));
    let mut state = ReconcileState::new(outstanding);
    let mut results = Vec::new();

    let mut done = 0usize;
    let mut passed = 0usize;
    let mut failed = 0usize;

    while !state.outstanding.is_empty() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let messages: Vec<ControlMessage> = if !state.early.is_empty() {
            state.early.drain(..).map(ControlMessage::Completion).collect()
        } else {
            let bodies = wait_for_messages(broker, control_queue, WAIT_COUNT, shutdown)?;
            bodies
                .iter()
                .filter_map(|b| match ControlMessage::from_json(b) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!(log, "malformed control message"; "error" => %e);
                        None
                    }
                })
                .collect()
        };

        for msg in messages {
            let Some(completion) = reconcile(&mut state, msg) else {
                continue;
            };

            done += 1;
            if !cli.quiet {
                print!("{}", completion.result.output);
                std::io::stdout().flush().ok();
            }
            if completion.result.status.is_success() {
                passed += 1;
            } else {
                failed += 1;
            }

            if cli.outfile.is_some() {
                results.push(completion.clone());
            }

            if cli.progress || cli.report.is_some() {
                let elapsed = start_time.elapsed().as_secs_f64();
                let eta = (state.total - done) as f64 * elapsed / done.max(1) as f64;
                if cli.progress {
                    eprint!(
                        "\r[{}] {}/{} jobs done ({} passed, {} failed.) ETA: {}",
                        nicetime(elapsed),
                        done,
                        state.total,
                        passed,
                        failed,
                        nicetime(eta)
                    );
                }
                if let Some(report) = &cli.report {
                    publish_report(
                        broker,
                        report,
                        serde_json::json!({
                            "status": "working",
                            "elapsed": elapsed,
                            "eta": eta,
                            "total": state.total,
                            "passed": passed,
                            "failed": failed,
                        }),
                    )?;
                }
            }
        }
    }

    if cli.progress {
        eprintln!();
    }

    if shutdown.load(Ordering::SeqCst) {
        eprintln!("dwqc: cancelling...");
        let ids: Vec<String> = state.outstanding.into_iter().collect();
        Job::cancel_all(broker, &ids)?;
        if let Some(report) = &cli.report {
            publish_report(broker, report, serde_json::json!({"status": "canceled"}))?;
        }
        return Ok(false);
    }

    if let Some(path) = &cli.outfile {
        let json = serde_json::to_string(&results)?;
        dwq_util::fs::Fs::new().write(path, json)?;
    }

    if let Some(report) = &cli.report {
        publish_report(broker, report, serde_json::json!({"status": "done"}))?;
    }

    Ok(failed == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_substitute_positionally() {
        assert_eq!(apply_placeholders("run ${1} then ${2}", "a b"), "run a then b");
    }

    #[test]
    fn options_override_merges_onto_exclusive_flag() {
        let opts = build_options(true, &[], Some(r#"{"max_retries": 5}"#)).unwrap();
        assert!(opts.is_exclusive_jobdir());
        assert_eq!(opts.max_retries, 5);
    }

    #[test]
    fn options_without_override_default_shared_jobdir() {
        let opts = build_options(false, &[], None).unwrap();
        assert!(!opts.is_exclusive_jobdir());
        assert_eq!(opts.max_retries, 2);
    }

    fn passing_completion(job_id: &str, unique: &str) -> Completion {
        let mut result = JobResult {
            status: dwq_base::JobStatusValue::exit_code(0),
            output: format!("output of {job_id}"),
            worker: None,
            runtime: None,
            body: None,
            unique: None,
        };
        if !unique.is_empty() {
            result.unique = Some(unique.to_owned());
        }
        Completion::done(job_id, result)
    }

    fn subjob_msg(parent: &str, subjob: &str, unique: &str) -> ControlMessage {
        ControlMessage::Subjob(dwq_base::SubjobAnnouncement {
            parent: parent.to_owned(),
            subjob: subjob.to_owned(),
            unique: unique.to_owned(),
        })
    }

    #[test]
    fn plain_completion_of_an_outstanding_job_resolves_immediately() {
        let mut state = ReconcileState::new(HashSet::from(["job-1".to_owned()]));
        let resolved = reconcile(&mut state, ControlMessage::Completion(passing_completion("job-1", "")));
        assert_eq!(resolved.map(|c| c.job_id), Some("job-1".to_owned()));
        assert!(state.outstanding.is_empty());
    }

    #[test]
    fn completion_of_an_unannounced_job_parks_in_unexpected() {
        // "Out-of-order subjob completion": the subjob's own completion shows
        // up on the control queue before dwqc has even learned the subjob
        // exists, because the parent's announcement and the subjob's own run
        // race independently.
        let mut state = ReconcileState::new(HashSet::from(["parent".to_owned()]));

        let resolved = reconcile(&mut state, ControlMessage::Completion(passing_completion("sub-1", "u1")));
        assert!(resolved.is_none(), "completion for an unannounced job must park, not resolve");
        assert!(state.unexpected.contains_key("sub-1"));
        assert!(!state.outstanding.contains("sub-1"));
    }

    #[test]
    fn completion_fans_out_already_announced_subjobs_into_outstanding() {
        let mut state = ReconcileState::new(HashSet::from(["parent".to_owned()]));
        reconcile(&mut state, subjob_msg("parent", "sub-1", "u1"));
        reconcile(&mut state, subjob_msg("parent", "sub-2", "u1"));

        let before = state.total;
        let resolved = reconcile(&mut state, ControlMessage::Completion(passing_completion("parent", "u1")));
        assert_eq!(resolved.map(|c| c.job_id), Some("parent".to_owned()));
        assert!(state.outstanding.contains("sub-1"));
        assert!(state.outstanding.contains("sub-2"));
        assert_eq!(state.total, before + 2);
    }

    #[test]
    fn subjob_completion_parked_before_announcement_moves_to_early_once_parent_completes() {
        let mut state = ReconcileState::new(HashSet::from(["parent".to_owned()]));

        reconcile(&mut state, ControlMessage::Completion(passing_completion("sub-1", "u1")));
        assert!(state.unexpected.contains_key("sub-1"));

        reconcile(&mut state, subjob_msg("parent", "sub-1", "u1"));
        reconcile(&mut state, ControlMessage::Completion(passing_completion("parent", "u1")));

        assert!(state.outstanding.contains("sub-1"));
        assert_eq!(state.early.len(), 1);
        assert_eq!(state.early.front().unwrap().job_id, "sub-1");
        assert!(!state.unexpected.contains_key("sub-1"));
    }
}
