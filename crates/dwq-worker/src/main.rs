use clap::Parser as _;
use dwq_util::config::LogLevel;
use dwq_worker::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet { LogLevel::Warning } else { cli.verbosity };
    let log = dwq_util::log::build_logger(level);
    dwq_worker::run(cli, log).into()
}
