mod cli;

pub use cli::{Cli, Command};

use anyhow::{bail, Result};
use dwq_broker::{BrokerContext, GetJobOpts};
use dwq_util::process::{ExitCode, ExitCodeAccumulator};
use slog::{warn, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DRAIN_BATCH: usize = 1024;

pub fn run(cli: Cli, log: Logger) -> ExitCode {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown));

    match run_inner(cli, &log, &shutdown) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("dwqm: error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_inner(cli: Cli, log: &Logger, shutdown: &AtomicBool) -> Result<ExitCode> {
    let broker = BrokerContext::connect(&[cli.broker.clone()], log)?;
    match cli.command {
        Command::Queue { show, drain } => match (show, drain) {
            (Some(names), None) => show_queues(&broker, &names),
            (None, Some(names)) => drain_queues(&broker, &names, shutdown),
            _ => bail!("queue: exactly one of --show or --drain is required"),
        },
        Command::Control {
            list,
            pause,
            resume,
            shutdown: shutdown_nodes,
        } => {
            let given = [&list, &pause, &resume, &shutdown_nodes]
                .iter()
                .filter(|o| o.is_some())
                .count();
            if given != 1 {
                bail!("control: exactly one of --list, --pause, --resume, or --shutdown is required");
            }
            if list.is_some() {
                list_nodes(&broker)
            } else if let Some(nodes) = pause {
                control_cmd(&broker, &nodes, "pause", log)
            } else if let Some(nodes) = resume {
                control_cmd(&broker, &nodes, "resume", log)
            } else if let Some(nodes) = shutdown_nodes {
                control_cmd(&broker, &nodes, "shutdown", log)
            } else {
                unreachable!()
            }
        }
    }
}

fn show_queues(broker: &BrokerContext, names: &[String]) -> Result<ExitCode> {
    let names: Vec<String> = if names.is_empty() {
        let mut all = broker.scan_queues()?;
        all.sort();
        all
    } else {
        names.to_vec()
    };
    let accum = ExitCodeAccumulator::new();
    for (name, result) in broker.qstat_all(&names) {
        match result {
            Ok(stats) => println!("name: {name} len: {} blocked: {}", stats.len, stats.blocked),
            Err(_) => {
                println!("invalid queue \"{name}\"");
                accum.add(ExitCode::FAILURE);
            }
        }
    }
    Ok(accum.get())
}

fn drain_queues(broker: &BrokerContext, names: &[String], shutdown: &AtomicBool) -> Result<ExitCode> {
    if names.is_empty() {
        bail!("drain: no queues given");
    }
    let queues = names.to_vec();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(ExitCode::SUCCESS);
        }
        let jobs = broker.get_job(
            &queues,
            GetJobOpts {
                timeout: None,
                count: Some(DRAIN_BATCH),
                nohang: true,
            },
        )?;
        if jobs.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
        let ids: Vec<String> = jobs.into_iter().map(|j| j.job_id).collect();
        broker.fast_ack(&ids)?;
    }
}

fn list_nodes(broker: &BrokerContext) -> Result<ExitCode> {
    let mut queues = broker.scan_queues()?;
    queues.retain(|q| q.starts_with("control::worker::"));
    queues.sort();
    for q in queues {
        if let Some(name) = q.strip_prefix("control::worker::") {
            println!("{name}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Send `cmd` to every node in `nodes`, independently: one unreachable node
/// doesn't stop the rest from being notified. The overall exit code is the
/// worst outcome across all of them.
fn control_cmd(broker: &BrokerContext, nodes: &[String], cmd: &str, log: &Logger) -> Result<ExitCode> {
    let control_queue = format!("control::{}", dwq_util::token::random_token());
    let accum = ExitCodeAccumulator::new();
    for node in nodes {
        println!("dwqm: sending \"{cmd}\" command to node \"{node}\"");
        // `status_queues` points replies at a one-shot queue; nothing reads
        // it today (spec §4.6: "replies are not consumed by this tool").
        let body = serde_json::json!({
            "control": {"cmd": cmd},
            "status_queues": [control_queue],
        });
        let result = serde_json::to_vec(&body).map_err(anyhow::Error::from).and_then(|bytes| {
            broker.add_job(&format!("control::worker::{node}"), &bytes, 3600_000, None)
        });
        if let Err(e) = result {
            warn!(log, "failed to send control command"; "node" => node, "cmd" => cmd, "error" => %e);
            accum.add(ExitCode::FAILURE);
        }
    }
    Ok(accum.get())
}
