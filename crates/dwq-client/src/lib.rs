mod cli;
mod dispatch;
mod filedata;
mod nicetime;

pub use cli::Cli;

use dwq_util::process::ExitCode;
use slog::{warn, Logger};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub fn run(cli: Cli, log: Logger) -> ExitCode {
    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown)) {
        warn!(log, "failed to install SIGTERM handler"; "error" => %e);
    }
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown)) {
        warn!(log, "failed to install SIGINT handler"; "error" => %e);
    }

    match dispatch::run(cli, log.clone(), shutdown) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("dwqc: error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
