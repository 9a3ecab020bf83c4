use clap::Parser;
use dwq_util::config::{BrokerAddr, LogLevel};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "dwqc", about = "dwq: disque-based work queue client")]
pub struct Cli {
    #[arg(short = 'q', long = "queue", env = "DWQ_QUEUE", default_value = "default")]
    pub queue: String,

    #[arg(short = 'r', long = "repo", env = "DWQ_REPO")]
    pub repo: String,

    #[arg(short = 'c', long = "commit", env = "DWQ_COMMIT")]
    pub commit: String,

    /// Don't share jobdirs between jobs.
    #[arg(short = 'e', long = "exclusive-jobdir")]
    pub exclusive_jobdir: bool,

    /// Enable progress output.
    #[arg(short = 'P', long = "progress")]
    pub progress: bool,

    /// Periodically publish structured status to this queue.
    #[arg(short = 'R', long = "report")]
    pub report: Option<String>,

    #[arg(short = 'v', long = "verbose", value_enum, default_value_t = LogLevel::Warning)]
    pub verbosity: LogLevel,

    /// Don't print command output.
    #[arg(short = 'Q', long = "quiet")]
    pub quiet: bool,

    /// Read jobs from stdin.
    #[arg(short = 's', long = "stdin")]
    pub stdin: bool,

    /// Write job results to this file as JSON.
    #[arg(short = 'o', long = "outfile")]
    pub outfile: Option<PathBuf>,

    /// Send all jobs together, after stdin EOF.
    #[arg(short = 'b', long = "batch")]
    pub batch: bool,

    /// Pass job(s) to the parent instance; don't wait for completion.
    #[arg(short = 'S', long = "subjob")]
    pub subjob: bool,

    /// VAR or VAR=value, repeatable. Without '=value', inherits from this
    /// process's environment.
    #[arg(short = 'E', long = "env")]
    pub env: Vec<String>,

    /// path[:destpath], repeatable. Packaged into the job's working
    /// directory before the command runs.
    #[arg(short = 'F', long = "file")]
    pub file: Vec<String>,

    #[arg(long = "broker", env = "DWQ_BROKER", default_value_t = BrokerAddr::default())]
    pub broker: BrokerAddr,

    /// Command template. Optional when --stdin is used without positional
    /// placeholders.
    pub command: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_defaults_and_repeatable_flags_accumulate() {
        let cli = Cli::parse_from([
            "dwqc", "-r", "repo", "-c", "deadbeef", "-E", "A=1", "-E", "B", "-F", "a.txt", "-F", "b.txt:dest.txt",
            "echo hi",
        ]);
        assert_eq!(cli.queue, "default");
        assert_eq!(cli.env, vec!["A=1".to_owned(), "B".to_owned()]);
        assert_eq!(cli.file, vec!["a.txt".to_owned(), "b.txt:dest.txt".to_owned()]);
        assert_eq!(cli.command.as_deref(), Some("echo hi"));
    }

    #[test]
    fn exclusive_and_batch_flags_are_independent() {
        let cli = Cli::parse_from(["dwqc", "-r", "repo", "-c", "deadbeef", "-e", "-b", "echo hi"]);
        assert!(cli.exclusive_jobdir);
        assert!(cli.batch);
        assert!(!cli.subjob);
    }
}
