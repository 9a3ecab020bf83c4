//! `dwqw`: fetches jobs from the broker, materializes a checkout of the
//! requested commit, runs the job's command, and reports the result.

mod cli;
mod control;
mod slot;

pub use cli::Cli;

use anyhow::{Context as _, Result};
use dwq_broker::BrokerContext;
use dwq_gitjobdir::GitJobDir;
use dwq_runner::CmdServerPool;
use dwq_util::process::ExitCode;
use slog::{info, o, warn, Logger};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// State shared by every worker slot and the top-level shutdown handler.
pub struct WorkerContext {
    pub broker: Arc<BrokerContext>,
    pub gitjobdir: Arc<GitJobDir>,
    pub runner: Arc<CmdServerPool>,
    pub queues: Vec<String>,
    pub control_queue: String,
    pub name: String,
    pub buildnum: String,
    pub log: Logger,
    pub shutdown: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
    pub working_set: Arc<Mutex<HashSet<String>>>,
}

pub fn run(cli: Cli, log: Logger) -> ExitCode {
    match run_inner(cli, log.clone()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!(log, "worker exiting on error"; "error" => %e);
            ExitCode::FAILURE
        }
    }
}

fn run_inner(cli: Cli, log: Logger) -> Result<()> {
    let name = cli.name.clone().unwrap_or_else(|| {
        gethostname::gethostname().to_string_lossy().into_owned()
    });
    let jobs = cli.jobs.unwrap_or_else(num_cpus::get);
    let jobdir_root = cli
        .jobdir_root
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join(format!("dwq-jobdir-{name}")));

    let broker = Arc::new(BrokerContext::connect(&[cli.broker.clone()], &log)?);
    let runner = Arc::new(CmdServerPool::new(jobs, &log));
    let gitjobdir = Arc::new(GitJobDir::new(
        jobdir_root,
        cli.jobdir_capacity,
        Arc::clone(&runner),
        &log,
    )?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let paused = Arc::new(AtomicBool::new(false));
    let working_set = Arc::new(Mutex::new(HashSet::new()));

    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("installing SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("installing SIGINT handler")?;

    let ctx = Arc::new(WorkerContext {
        broker,
        gitjobdir,
        runner,
        queues: cli.queues.clone(),
        control_queue: format!("control::worker::{name}"),
        name,
        buildnum: std::env::var("DWQ_WORKER_BUILDNUM").unwrap_or_else(|_| "0".to_owned()),
        log: log.clone(),
        shutdown: Arc::clone(&shutdown),
        paused,
        working_set,
    });

    info!(log, "worker starting"; "name" => %ctx.name, "jobs" => jobs, "queues" => ?ctx.queues);

    let control_thread = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || control::control_loop(ctx))
    };

    let slot_threads: Vec<_> = (0..jobs)
        .map(|slot_index| {
            let ctx = Arc::clone(&ctx);
            thread::Builder::new()
                .name(format!("dwq-slot-{slot_index}"))
                .spawn(move || slot::slot_loop(ctx, slot_index))
                .expect("spawning worker slot thread")
        })
        .collect();

    for t in slot_threads {
        let _ = t.join();
    }
    shutdown.store(true, Ordering::SeqCst);
    let _ = control_thread.join();

    let stranded: Vec<String> = ctx.working_set.lock().unwrap().iter().cloned().collect();
    if !stranded.is_empty() {
        warn!(log, "nacking stranded jobs on shutdown"; "count" => stranded.len());
        let _ = ctx.broker.nack_many(&stranded);
    }
    ctx.gitjobdir.cleanup().context("cleaning up jobdir cache")?;
    info!(log, "worker shut down cleanly");
    Ok(())
}

pub(crate) const SLOT_SHUTDOWN_POLL: Duration = Duration::from_millis(250);
pub(crate) const SLOT_RESTART_DELAY: Duration = Duration::from_secs(10);
pub(crate) fn log_with_slot(log: &Logger, slot_index: usize) -> Logger {
    log.new(o!("slot" => slot_index))
}
