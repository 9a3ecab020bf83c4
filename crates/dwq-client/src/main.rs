use clap::Parser as _;
use dwq_client::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet { dwq_util::config::LogLevel::Error } else { cli.verbosity };
    let log = dwq_util::log::build_logger(level);
    dwq_client::run(cli, log).into()
}
