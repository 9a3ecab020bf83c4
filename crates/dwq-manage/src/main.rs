use clap::Parser as _;
use dwq_manage::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = dwq_util::log::build_logger(cli.verbosity);
    dwq_manage::run(cli, log).into()
}
