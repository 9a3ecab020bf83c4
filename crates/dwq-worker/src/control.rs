use dwq_broker::GetJobOpts;
use serde::Deserialize;
use slog::{info, o, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::WorkerContext;

#[derive(Deserialize)]
struct ControlEnvelope {
    control: ControlBody,
}

#[derive(Deserialize)]
struct ControlBody {
    cmd: String,
}

/// Listens on `control::worker::<name>` for `{control:{cmd:...}}` messages,
/// per spec §6 ("Control queues for workers").
pub fn control_loop(ctx: Arc<WorkerContext>) {
    let log = ctx.log.new(o!("component" => "control"));
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let queues = [ctx.control_queue.clone()];
        match ctx.broker.get_job(
            &queues,
            GetJobOpts {
                timeout: Some(Duration::from_secs(1)),
                count: Some(8),
                nohang: false,
            },
        ) {
            Ok(raws) => {
                let ids: Vec<String> = raws.iter().map(|j| j.job_id.clone()).collect();
                let _ = ctx.broker.fast_ack(&ids);
                for raw in raws {
                    match serde_json::from_slice::<ControlEnvelope>(&raw.body) {
                        Ok(envelope) => apply(&ctx.paused, &ctx.shutdown, &envelope.control.cmd, &log),
                        Err(e) => warn!(log, "malformed control message"; "error" => %e),
                    }
                }
            }
            Err(e) => {
                warn!(log, "control queue read failed"; "error" => %e);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

fn apply(paused: &std::sync::atomic::AtomicBool, shutdown: &std::sync::atomic::AtomicBool, cmd: &str, log: &slog::Logger) {
    match cmd {
        "pause" => {
            paused.store(true, Ordering::SeqCst);
            info!(log, "paused by control command");
        }
        "resume" => {
            paused.store(false, Ordering::SeqCst);
            info!(log, "resumed by control command");
        }
        "shutdown" => {
            shutdown.store(true, Ordering::SeqCst);
            info!(log, "shutdown requested by control command");
        }
        other => warn!(log, "unknown control command"; "cmd" => other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use slog::{Discard, Logger};
    use std::sync::atomic::AtomicBool;

    fn test_log() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    #[test]
    fn recognized_commands_flip_the_expected_flag() {
        let log = test_log();
        let expectations = hashmap! {
            "pause" => (true, false),
            "resume" => (false, false),
            "shutdown" => (false, true),
        };
        for (cmd, (want_paused, want_shutdown)) in expectations {
            let paused = AtomicBool::new(cmd == "resume");
            let shutdown = AtomicBool::new(false);
            apply(&paused, &shutdown, cmd, &log);
            assert_eq!(paused.load(Ordering::SeqCst), want_paused, "cmd={cmd}");
            assert_eq!(shutdown.load(Ordering::SeqCst), want_shutdown, "cmd={cmd}");
        }
    }

    #[test]
    fn unknown_command_leaves_flags_untouched() {
        let log = test_log();
        let paused = AtomicBool::new(false);
        let shutdown = AtomicBool::new(false);
        apply(&paused, &shutdown, "frobnicate", &log);
        assert!(!paused.load(Ordering::SeqCst));
        assert!(!shutdown.load(Ordering::SeqCst));
    }
}
